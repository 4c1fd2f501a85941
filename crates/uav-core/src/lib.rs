pub mod commands;
pub mod models;
pub mod registration;
pub mod telemetry;

pub use commands::{apply_command, CommandOutcome, DEFAULT_TAKEOFF_ALTITUDE_M};
pub use models::{
    Command, CommandKind, CommandResponse, CommandStatus, DeviceState, FlightMode,
    TelemetryFrame,
};
pub use registration::{
    response_topic_for, CredentialsError, MqttCredentials, RegistrationAccepted,
    RegistrationRequest, RegistrationStatus, SessionCredentials, StatusResponse,
    ValidationError,
};
pub use telemetry::{Position, TelemetryGenerator};
