//! Registration status polling.

use std::time::Duration;

use uav_core::{CredentialsError, RegistrationStatus, SessionCredentials, StatusResponse};

use crate::client::RegistrationHandle;
use crate::error::RegistrationError;

/// Approved registration.
#[derive(Debug, Clone)]
pub struct Approval {
    /// Identifier assigned by the backend, when it sends one.
    pub drone_id: Option<String>,
    pub credentials: SessionCredentials,
}

/// Terminal result of polling.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Approved(Approval),
    Rejected { message: String },
}

/// Polls a registration's status locator until a decision is made.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: reqwest::Client,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(client: reqwest::Client, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until APPROVED or REJECTED.
    ///
    /// HTTP failures and unknown statuses are logged and polled through;
    /// there is no upper bound, so callers cancel by dropping the future.
    /// The only error returned is an approval whose credentials are unusable.
    pub async fn await_approval(
        &self,
        handle: &RegistrationHandle,
    ) -> Result<PollOutcome, RegistrationError> {
        tracing::info!(
            request_id = %handle.request_id,
            "Polling registration status every {:?}",
            self.interval
        );

        loop {
            match self.check(&handle.status_url).await {
                Ok(response) => {
                    let message = response.message.clone().unwrap_or_default();
                    match response.status {
                        RegistrationStatus::Approved => return approve(response),
                        RegistrationStatus::Rejected => {
                            tracing::warn!("Registration rejected: {}", message);
                            return Ok(PollOutcome::Rejected { message });
                        }
                        RegistrationStatus::Pending => {
                            tracing::info!("Registration pending: {}", message);
                        }
                        RegistrationStatus::Unknown(status) => {
                            tracing::warn!("Unexpected registration status {:?}: {}", status, message);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Registration status check failed: {} (retrying in {:?})",
                        err,
                        self.interval
                    );
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    async fn check(&self, url: &str) -> Result<StatusResponse, RegistrationError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrationError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

fn approve(response: StatusResponse) -> Result<PollOutcome, RegistrationError> {
    let wire = response
        .mqtt_credentials
        .ok_or(CredentialsError::Missing("mqttCredentials"))?;
    let credentials = SessionCredentials::try_from(wire)?;

    tracing::info!(
        drone_id = response.drone_id.as_deref().unwrap_or("<unassigned>"),
        broker = %credentials.broker_url,
        "Registration approved"
    );

    Ok(PollOutcome::Approved(Approval {
        drone_id: response.drone_id,
        credentials,
    }))
}
