//! UAV SDK - simulated drone client
//!
//! Registers a drone with the backend, waits for approval, opens the broker
//! session and runs the telemetry and command activities over it.

pub mod client;
pub mod commands;
pub mod error;
pub mod poller;
pub mod publish;
pub mod session;
pub mod state;
pub mod telemetry;

pub use client::{RegistrationClient, RegistrationHandle};
pub use commands::{CommandHandler, UnknownCommandPolicy};
pub use error::{RegistrationError, SessionError};
pub use poller::{Approval, PollOutcome, StatusPoller};
pub use publish::{Delivery, InboundMessage, Publish};
pub use session::{client_id_for, BrokerAddress, Session, SessionHandle, SessionManager};
pub use state::SharedDeviceState;
pub use telemetry::TelemetryLoop;
