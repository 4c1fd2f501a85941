//! Error types for the registration and session clients.

use thiserror::Error;
use uav_core::CredentialsError;

/// Failures of the registration handshake and approval polling.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("registration accepted without a requestId")]
    MissingRequestId,
    #[error("approved registration has unusable credentials: {0}")]
    Credentials(#[from] CredentialsError),
}

/// Failures of the broker session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid broker address {url:?}: {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("broker connection failed")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("broker refused subscription to {0}")]
    SubscribeRefused(String),
    #[error("broker request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker connection lost")]
    ConnectionLost(#[source] rumqttc::ConnectionError),
    #[error("session closed")]
    Closed,
}
