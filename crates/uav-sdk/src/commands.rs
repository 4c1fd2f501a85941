//! Inbound command handling.

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use uav_core::{
    apply_command, Command, CommandOutcome, CommandResponse, CommandStatus, SessionCredentials,
};

use crate::publish::{Delivery, InboundMessage, Publish};
use crate::state::SharedDeviceState;

/// How to answer command types the simulator does not implement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownCommandPolicy {
    /// Answer REJECTED and leave the state alone.
    #[default]
    Reject,
    /// Answer SUCCESS without doing anything.
    Acknowledge,
}

/// Decodes commands, applies them to the shared state and answers each one.
pub struct CommandHandler<P> {
    state: SharedDeviceState,
    publisher: P,
    command_topic: String,
    response_topic: String,
    drone_id: String,
    unknown_policy: UnknownCommandPolicy,
}

impl<P: Publish> CommandHandler<P> {
    pub fn new(
        state: SharedDeviceState,
        publisher: P,
        credentials: &SessionCredentials,
        drone_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            publisher,
            command_topic: credentials.command_topic.clone(),
            response_topic: credentials.response_topic.clone(),
            drone_id: drone_id.into(),
            unknown_policy: UnknownCommandPolicy::default(),
        }
    }

    pub fn with_unknown_policy(mut self, policy: UnknownCommandPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    /// Handle one inbound message.
    ///
    /// Returns the response that was produced, or `None` when the payload
    /// could not be decoded (there is no command id to answer).
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> Option<CommandResponse> {
        if topic != self.command_topic {
            tracing::debug!("Ignoring message on unexpected topic {}", topic);
            return None;
        }

        let command: Command = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping undecodable command: {}",
                    err
                );
                return None;
            }
        };

        tracing::info!(
            command_id = %command.command_id,
            kind = %command.kind,
            addressed_to = command.drone_id.as_deref().unwrap_or("-"),
            issued_at = ?command.timestamp,
            "Command received"
        );

        let outcome = {
            let mut state = self.state.lock().await;
            apply_command(&mut state, &command)
        };

        let (status, message) = match outcome {
            CommandOutcome::Applied { message } => (CommandStatus::Success, message),
            CommandOutcome::Invalid { reason } => {
                tracing::warn!(command_id = %command.command_id, "Invalid command: {}", reason);
                (CommandStatus::Failed, reason)
            }
            CommandOutcome::Unrecognized { kind } => match self.unknown_policy {
                UnknownCommandPolicy::Reject => {
                    tracing::warn!(command_id = %command.command_id, "Unsupported command type {}", kind);
                    (
                        CommandStatus::Rejected,
                        format!("unsupported command type {}", kind),
                    )
                }
                UnknownCommandPolicy::Acknowledge => {
                    tracing::warn!(
                        command_id = %command.command_id,
                        "Acknowledging unsupported command type {}",
                        kind
                    );
                    (
                        CommandStatus::Success,
                        format!("command type {} acknowledged without action", kind),
                    )
                }
            },
        };

        let response = CommandResponse {
            command_id: command.command_id,
            drone_id: self.drone_id.clone(),
            timestamp: Utc::now(),
            status,
            message,
        };
        self.respond(&response).await;
        Some(response)
    }

    async fn respond(&self, response: &CommandResponse) {
        let payload = match serde_json::to_vec(response) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to encode command response: {}", err);
                return;
            }
        };

        match self
            .publisher
            .publish(&self.response_topic, payload, Delivery::AtLeastOnce)
            .await
        {
            Ok(()) => tracing::info!(
                command_id = %response.command_id,
                status = ?response.status,
                "Command response delivered to {}",
                self.response_topic
            ),
            Err(err) => tracing::error!(
                command_id = %response.command_id,
                "Command response not delivered: {}",
                err
            ),
        }
    }

    /// Consume `inbound` until it closes or `shutdown` fires. A command being
    /// handled when shutdown arrives is finished, response included.
    pub async fn run(
        self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Listening for commands on {}", self.command_topic);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Command handler shutting down");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.on_message(&message.topic, &message.payload).await;
                    }
                    None => {
                        tracing::info!("Command queue closed");
                        break;
                    }
                },
            }
        }
    }
}
