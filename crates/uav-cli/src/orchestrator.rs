//! Lifecycle driver: register, await approval, go live, shut down.

use std::future::Future;

use anyhow::Context;
use tokio::sync::broadcast;
use uav_core::TelemetryGenerator;
use uav_sdk::{
    client_id_for, CommandHandler, PollOutcome, RegistrationClient, SessionManager,
    SharedDeviceState, TelemetryLoop,
};

use crate::config::SimConfig;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped by the shutdown signal.
    Interrupted,
    /// The backend turned the registration down.
    Rejected { message: String },
}

pub struct Orchestrator {
    config: SimConfig,
}

impl Orchestrator {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Run the whole lifecycle until `shutdown` resolves, the registration is
    /// rejected, or a stage fails.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<RunOutcome> {
        tokio::pin!(shutdown);
        let config = self.config;
        let serial = config.serial().to_string();

        let mut generator = TelemetryGenerator::from_entropy();
        let state = SharedDeviceState::new(generator.initial_state(config.position));
        tracing::info!(
            serial = %serial,
            model = %config.registration.model(),
            "Simulated drone starting at ({}, {})",
            config.position.latitude,
            config.position.longitude
        );

        // Registration
        let client = RegistrationClient::new(&config.api_url);
        let handle = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted while registering");
                return Ok(RunOutcome::Interrupted);
            }
            registered = client.register(&config.registration) => registered.context("registration failed")?,
        };

        // Approval
        let poller = client.poller(config.poll_interval);
        let outcome = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted while awaiting approval");
                return Ok(RunOutcome::Interrupted);
            }
            outcome = poller.await_approval(&handle) => outcome.context("approval failed")?,
        };
        let approval = match outcome {
            PollOutcome::Approved(approval) => approval,
            PollOutcome::Rejected { message } => {
                tracing::warn!("Registration rejected: {}", message);
                return Ok(RunOutcome::Rejected { message });
            }
        };
        let credentials = approval.credentials;

        // Session
        let manager = SessionManager::new(client_id_for(&serial));
        let (mut session, inbound) = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted while connecting");
                return Ok(RunOutcome::Interrupted);
            }
            connected = manager.connect(&credentials) => connected.context("broker connection failed")?,
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let telemetry = TelemetryLoop::new(
            state.clone(),
            generator,
            session.handle(),
            credentials.telemetry_topic.clone(),
            serial.clone(),
            config.telemetry_interval,
        );
        let telemetry_task = tokio::spawn(telemetry.run(shutdown_tx.subscribe()));

        let commands = CommandHandler::new(state, session.handle(), &credentials, serial)
            .with_unknown_policy(config.unknown_commands);
        let command_task = tokio::spawn(commands.run(inbound, shutdown_tx.subscribe()));

        tracing::info!("Drone is live");

        let fault = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                None
            }
            err = session.fault() => Some(err),
        };

        // Stop both activities and let in-flight work finish before closing.
        let _ = shutdown_tx.send(());
        match telemetry_task.await {
            Ok(frames) => tracing::info!("Telemetry stopped after {} frames", frames),
            Err(err) => tracing::error!("Telemetry task failed: {}", err),
        }
        if let Err(err) = command_task.await {
            tracing::error!("Command task failed: {}", err);
        }

        if let Some(err) = fault {
            return Err(anyhow::Error::new(err).context("broker session lost"));
        }

        if let Err(err) = session.close().await {
            tracing::warn!("Session did not close cleanly: {}", err);
        }
        Ok(RunOutcome::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use clap::Parser;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use uav_sdk::SessionError;

    use crate::config::Args;

    #[derive(Clone)]
    struct Backend {
        status: Value,
        checks: Arc<AtomicUsize>,
    }

    async fn spawn_backend(
        register: (StatusCode, Value),
        status: Value,
    ) -> (String, Arc<AtomicUsize>) {
        let checks = Arc::new(AtomicUsize::new(0));
        let backend = Backend {
            status,
            checks: checks.clone(),
        };
        let app = Router::new()
            .route(
                "/api/v1/drones/register",
                post(move || {
                    let register = register.clone();
                    async move { (register.0, Json(register.1)) }
                }),
            )
            .route(
                "/api/v1/drones/registration/:request_id/status",
                get(|State(backend): State<Backend>| async move {
                    backend.checks.fetch_add(1, Ordering::SeqCst);
                    Json(backend.status.clone())
                }),
            )
            .with_state(backend);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/v1", addr), checks)
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Single-client MQTT 3.1.1 broker: accepts CONNECT and SUBSCRIBE, records
    /// the topic of every PUBLISH (never acknowledging one) and hangs up after
    /// `hang_up_after` of them.
    async fn spawn_broker(hang_up_after: usize) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let topics = Arc::new(Mutex::new(Vec::new()));
        let seen = topics.clone();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok((header, body)) = read_packet(&mut stream).await {
                match header >> 4 {
                    1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                    8 => stream
                        .write_all(&[0x90, 0x03, body[0], body[1], 0x01])
                        .await
                        .unwrap(),
                    3 => {
                        let len = u16::from_be_bytes([body[0], body[1]]) as usize;
                        let topic = String::from_utf8_lossy(&body[2..2 + len]).to_string();
                        let mut seen = seen.lock().unwrap();
                        seen.push(topic);
                        if seen.len() >= hang_up_after {
                            break;
                        }
                    }
                    12 => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
                    _ => {}
                }
            }
        });
        (url, topics)
    }

    fn config_with(api_url: &str, extra: &[&str]) -> SimConfig {
        let mut argv = vec![
            "sim_drone",
            "--serial",
            "SIM-TEST",
            "--api-url",
            api_url,
            "--poll-interval",
            "0.01",
        ];
        argv.extend_from_slice(extra);
        SimConfig::from_args(Args::try_parse_from(argv).unwrap()).unwrap()
    }

    fn config(api_url: &str) -> SimConfig {
        config_with(api_url, &[])
    }

    fn accepted() -> (StatusCode, Value) {
        (StatusCode::ACCEPTED, json!({"requestId": "r-1"}))
    }

    fn approved(broker_url: &str) -> Value {
        json!({
            "status": "APPROVED",
            "droneId": "d-1",
            "mqttCredentials": {
                "mqttBrokerUrl": broker_url,
                "mqttUsername": "drone_d1",
                "mqttPassword": "pw",
                "mqttTopicTelemetry": "drones/d-1/telemetry",
                "mqttTopicCommands": "drones/d-1/commands"
            }
        })
    }

    #[tokio::test]
    async fn rejected_registration_ends_gracefully() {
        let (url, _) = spawn_backend(
            accepted(),
            json!({"status": "REJECTED", "message": "not on the allow list"}),
        )
        .await;

        let outcome = Orchestrator::new(config(&url))
            .run(std::future::pending())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Rejected {
                message: "not on the allow list".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failed_registration_is_an_error() {
        let (url, checks) = spawn_backend(
            (StatusCode::BAD_REQUEST, json!({"error": "duplicate"})),
            json!({"status": "PENDING"}),
        )
        .await;

        let result = Orchestrator::new(config(&url))
            .run(std::future::pending())
            .await;
        assert!(result.is_err());
        assert_eq!(checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interrupt_while_registering_stops_cleanly() {
        // Completes the TCP handshake but never answers the request.
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v1", silent.local_addr().unwrap());

        let outcome = Orchestrator::new(config(&url))
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        drop(silent);
    }

    #[tokio::test]
    async fn interrupt_while_pending_stops_polling() {
        let (url, checks) = spawn_backend(accepted(), json!({"status": "PENDING"})).await;

        let outcome = Orchestrator::new(config(&url))
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert!(checks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn unreachable_broker_is_an_error() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let (url, _) =
            spawn_backend(accepted(), approved(&format!("tcp://127.0.0.1:{}", port))).await;

        let result = Orchestrator::new(config(&url))
            .run(std::future::pending())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn broker_hang_up_after_going_live_is_fatal() {
        let (broker_url, topics) = spawn_broker(2).await;
        let (url, _) = spawn_backend(accepted(), approved(&broker_url)).await;
        let config = config_with(&url, &["--telemetry-interval", "0.05"]);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            Orchestrator::new(config).run(std::future::pending()),
        )
        .await
        .expect("run ends once the broker hangs up");

        let err = result.unwrap_err();
        assert!(
            format!("{:#}", err).starts_with("broker session lost: broker connection lost"),
            "{:#}",
            err
        );
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::ConnectionLost(_))
        ));

        let topics = topics.lock().unwrap().clone();
        assert_eq!(topics, vec!["drones/d-1/telemetry".to_string(); 2]);
    }
}
