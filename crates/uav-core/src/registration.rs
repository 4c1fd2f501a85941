//! Registration handshake models and session credentials.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERIAL_MIN_LEN: usize = 3;
const SERIAL_MAX_LEN: usize = 50;
const MODEL_MIN_LEN: usize = 2;
const MODEL_MAX_LEN: usize = 50;
const NOTES_MAX_LEN: usize = 1000;

/// Topic segment replaced to derive the response topic.
const TELEMETRY_SEGMENT: &str = "telemetry";
const RESPONSES_SEGMENT: &str = "responses";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("serial number must be 3-50 characters, got {0}")]
    SerialLength(usize),
    #[error("serial number may only contain letters, digits, '-' and '_': {0:?}")]
    SerialCharset(String),
    #[error("model must be 2-50 non-blank characters")]
    Model,
    #[error("notes must not exceed 1000 characters")]
    Notes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("broker credentials are missing {0}")]
    Missing(&'static str),
    #[error("telemetry topic {0:?} has no 'telemetry' segment to derive a response topic")]
    NoTelemetrySegment(String),
}

/// Identity submitted once to the registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    serial_number: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl RegistrationRequest {
    /// Build a request, applying the same field rules the backend enforces.
    pub fn new(
        serial_number: impl Into<String>,
        model: impl Into<String>,
        notes: Option<String>,
    ) -> Result<Self, ValidationError> {
        let serial_number = serial_number.into();
        let model = model.into();

        let serial_len = serial_number.chars().count();
        if !(SERIAL_MIN_LEN..=SERIAL_MAX_LEN).contains(&serial_len) {
            return Err(ValidationError::SerialLength(serial_len));
        }
        if !serial_number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::SerialCharset(serial_number));
        }

        let model_len = model.chars().count();
        if model.trim().is_empty() || !(MODEL_MIN_LEN..=MODEL_MAX_LEN).contains(&model_len) {
            return Err(ValidationError::Model);
        }

        if notes
            .as_ref()
            .is_some_and(|n| n.chars().count() > NOTES_MAX_LEN)
        {
            return Err(ValidationError::Notes);
        }

        Ok(Self {
            serial_number,
            model,
            notes,
        })
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

/// Body of the `202 Accepted` registration response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationAccepted {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status_check_url: Option<String>,
}

/// Registration decision reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    /// Any value this client does not know yet.
    Unknown(String),
}

impl From<String> for RegistrationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PENDING" => RegistrationStatus::Pending,
            "APPROVED" => RegistrationStatus::Approved,
            "REJECTED" => RegistrationStatus::Rejected,
            _ => RegistrationStatus::Unknown(value),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "PENDING"),
            RegistrationStatus::Approved => write!(f, "APPROVED"),
            RegistrationStatus::Rejected => write!(f, "REJECTED"),
            RegistrationStatus::Unknown(other) => write!(f, "{}", other),
        }
    }
}

/// Body of a status check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: RegistrationStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub drone_id: Option<String>,
    #[serde(default)]
    pub mqtt_credentials: Option<MqttCredentials>,
}

/// Broker credentials as sent by the backend; every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttCredentials {
    #[serde(default)]
    pub mqtt_broker_url: Option<String>,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default)]
    pub mqtt_topic_telemetry: Option<String>,
    #[serde(default)]
    pub mqtt_topic_commands: Option<String>,
}

/// Complete credentials for one broker session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub broker_url: String,
    pub username: String,
    pub password: String,
    pub telemetry_topic: String,
    pub command_topic: String,
    pub response_topic: String,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("broker_url", &self.broker_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("telemetry_topic", &self.telemetry_topic)
            .field("command_topic", &self.command_topic)
            .field("response_topic", &self.response_topic)
            .finish()
    }
}

impl TryFrom<MqttCredentials> for SessionCredentials {
    type Error = CredentialsError;

    fn try_from(wire: MqttCredentials) -> Result<Self, Self::Error> {
        let broker_url = required(wire.mqtt_broker_url, "mqttBrokerUrl")?;
        let username = required(wire.mqtt_username, "mqttUsername")?;
        let password = required(wire.mqtt_password, "mqttPassword")?;
        let telemetry_topic = required(wire.mqtt_topic_telemetry, "mqttTopicTelemetry")?;
        let command_topic = required(wire.mqtt_topic_commands, "mqttTopicCommands")?;
        let response_topic = response_topic_for(&telemetry_topic)?;

        Ok(Self {
            broker_url,
            username,
            password,
            telemetry_topic,
            command_topic,
            response_topic,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, CredentialsError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(CredentialsError::Missing(field))
}

/// Derive the response topic by swapping the last `telemetry` segment for
/// `responses`, e.g. `drones/42/telemetry` -> `drones/42/responses`.
pub fn response_topic_for(telemetry_topic: &str) -> Result<String, CredentialsError> {
    let mut segments: Vec<&str> = telemetry_topic.split('/').collect();
    let position = segments
        .iter()
        .rposition(|segment| *segment == TELEMETRY_SEGMENT)
        .ok_or_else(|| CredentialsError::NoTelemetrySegment(telemetry_topic.to_string()))?;
    segments[position] = RESPONSES_SEGMENT;
    Ok(segments.join("/"))
}
