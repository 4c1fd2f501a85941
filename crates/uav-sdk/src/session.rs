//! Broker session lifecycle.
//!
//! [`SessionManager::connect`] authenticates, waits for the CONNACK,
//! subscribes to the command topic and then hands the event loop to a
//! background task. That task forwards inbound publishes to an mpsc queue and
//! settles at-least-once publishes when their PUBACK arrives.
//!
//! A dropped connection is not retried: the pump exits with
//! [`SessionError::ConnectionLost`] and [`Session::fault`] reports it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uav_core::SessionCredentials;
use uuid::Uuid;

use crate::error::SessionError;
use crate::publish::{Delivery, InboundMessage, Publish};

pub const DEFAULT_BROKER_PORT: u16 = 1883;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;

/// Host and port parsed from a `tcp://host:port` broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Accepts `tcp://` and `mqtt://` addresses; the port defaults to 1883.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let invalid = |reason: String| SessionError::InvalidBrokerUrl {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "tcp" | "mqtt" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_BROKER_PORT),
        })
    }
}

/// Client identifier for a simulated drone: `sim-drone-<serial>-<8 hex>`.
pub fn client_id_for(serial: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("sim-drone-{}-{}", serial, &suffix[..8])
}

/// Opens broker sessions for one client identity.
#[derive(Debug, Clone)]
pub struct SessionManager {
    client_id: String,
    keep_alive: Duration,
}

impl SessionManager {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: KEEP_ALIVE,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connect, authenticate and subscribe to `credentials.command_topic`.
    ///
    /// Returns the session and the queue of messages received on the
    /// subscription.
    pub async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<(Session, mpsc::UnboundedReceiver<InboundMessage>), SessionError> {
        let broker = BrokerAddress::parse(&credentials.broker_url)?;
        tracing::info!(
            client_id = %self.client_id,
            "Connecting to MQTT broker {}:{}",
            broker.host,
            broker.port
        );

        let mut options = MqttOptions::new(&self.client_id, &broker.host, broker.port);
        options.set_credentials(&credentials.username, &credentials.password);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        // The pump also settles the consumer's PUBACKs, so it must never wait on it.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        await_connack(&mut eventloop).await?;
        tracing::info!("Connected to MQTT broker {}", credentials.broker_url);

        client
            .subscribe(&credentials.command_topic, QoS::AtLeastOnce)
            .await?;
        await_suback(&mut eventloop, &credentials.command_topic, &inbound_tx).await?;
        tracing::info!("Subscribed to command topic {}", credentials.command_topic);

        let acks = Arc::new(AckTracker::default());
        let closing = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump(
            eventloop,
            inbound_tx,
            acks.clone(),
            closing.clone(),
        ));

        let session = Session {
            handle: SessionHandle {
                client,
                acks,
                publish_order: Arc::new(tokio::sync::Mutex::new(())),
            },
            pump: Some(pump),
            closing,
        };
        Ok((session, inbound_rx))
    }
}

/// An established broker session.
pub struct Session {
    handle: SessionHandle,
    pump: Option<JoinHandle<Result<(), SessionError>>>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Cloneable publisher for this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Resolves when the background connection ends without being asked to.
    /// Cancel-safe; pending forever once the result has been taken.
    pub async fn fault(&mut self) -> SessionError {
        let Some(pump) = self.pump.as_mut() else {
            return std::future::pending().await;
        };
        let result = pump.await;
        self.pump = None;
        match result {
            Ok(Ok(())) => SessionError::Closed,
            Ok(Err(err)) => err,
            Err(join_err) => {
                tracing::error!("MQTT event loop task failed: {}", join_err);
                SessionError::Closed
            }
        }
    }

    /// Disconnect and wait for the background task to finish.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(err) = self.handle.client.disconnect().await {
            tracing::debug!("Disconnect request not delivered: {}", err);
        }

        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        match pump.await {
            Ok(result) => {
                tracing::info!("MQTT session closed");
                result
            }
            Err(join_err) => {
                tracing::error!("MQTT event loop task failed: {}", join_err);
                Err(SessionError::Closed)
            }
        }
    }
}

/// Publisher half of a [`Session`], safe to use from several tasks.
#[derive(Clone)]
pub struct SessionHandle {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    /// Keeps at-least-once publishes in the order their waiters were queued.
    publish_order: Arc<tokio::sync::Mutex<()>>,
}

impl Publish for SessionHandle {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(), SessionError> {
        match delivery {
            Delivery::AtMostOnce => {
                self.client
                    .publish(topic, QoS::AtMostOnce, false, payload)
                    .await?;
                Ok(())
            }
            Delivery::AtLeastOnce => {
                let (ack_tx, ack_rx) = oneshot::channel();
                {
                    let _order = self.publish_order.lock().await;
                    self.acks.enqueue(ack_tx);
                    if let Err(err) = self
                        .client
                        .publish(topic, QoS::AtLeastOnce, false, payload)
                        .await
                    {
                        self.acks.cancel_last();
                        return Err(err.into());
                    }
                }
                ack_rx.await.map_err(|_| SessionError::Closed)
            }
        }
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(SessionError::Refused(format!("{:?}", ack.code)));
            }
            event => tracing::trace!("MQTT event before CONNACK: {:?}", event),
        }
    }
}

async fn await_suback(
    eventloop: &mut EventLoop,
    topic: &str,
    inbound: &mpsc::UnboundedSender<InboundMessage>,
) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(SessionError::SubscribeRefused(topic.to_string()));
                }
                return Ok(());
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let _ = inbound.send(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            event => tracing::trace!("MQTT event before SUBACK: {:?}", event),
        }
    }
}

/// Drives the event loop until the session is closed or the connection drops.
async fn pump(
    mut eventloop: EventLoop,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    acks: Arc<AckTracker>,
    closing: Arc<AtomicBool>,
) -> Result<(), SessionError> {
    let result = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(message).is_err() {
                    tracing::debug!("Inbound queue closed; dropping message");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => acks.acknowledge(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => acks.assign(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break Ok(()),
            Ok(event) => tracing::trace!("MQTT event: {:?}", event),
            Err(err) => {
                if closing.load(Ordering::SeqCst) {
                    break Ok(());
                }
                tracing::error!("MQTT connection lost: {}", err);
                break Err(SessionError::ConnectionLost(err));
            }
        }
    };

    acks.fail_all();
    result
}

/// Matches at-least-once publishes to their PUBACKs.
///
/// Waiters are queued in submission order and bound to a packet id when the
/// event loop reports the outgoing PUBLISH. QoS 0 publishes carry packet id
/// 0 and are ignored.
#[derive(Default)]
struct AckTracker {
    queued: Mutex<VecDeque<oneshot::Sender<()>>>,
    inflight: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl AckTracker {
    fn enqueue(&self, waiter: oneshot::Sender<()>) {
        lock(&self.queued).push_back(waiter);
    }

    fn cancel_last(&self) {
        lock(&self.queued).pop_back();
    }

    fn assign(&self, pkid: u16) {
        if pkid == 0 {
            return;
        }
        if let Some(waiter) = lock(&self.queued).pop_front() {
            lock(&self.inflight).insert(pkid, waiter);
        }
    }

    fn acknowledge(&self, pkid: u16) {
        if let Some(waiter) = lock(&self.inflight).remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Drop every waiter so their publishers observe the closed session.
    fn fail_all(&self) {
        lock(&self.queued).clear();
        lock(&self.inflight).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_address_with_port() {
        let broker = BrokerAddress::parse("tcp://broker.local:1884").unwrap();
        assert_eq!(
            broker,
            BrokerAddress {
                host: "broker.local".to_string(),
                port: 1884
            }
        );
    }

    #[test]
    fn port_defaults_to_1883() {
        let broker = BrokerAddress::parse("mqtt://10.0.0.5").unwrap();
        assert_eq!(broker.host, "10.0.0.5");
        assert_eq!(broker.port, DEFAULT_BROKER_PORT);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["localhost:1883", "http://localhost:1883", "tcp://", "", "tcp://host:99999"] {
            assert!(
                matches!(
                    BrokerAddress::parse(raw),
                    Err(SessionError::InvalidBrokerUrl { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn client_id_embeds_serial() {
        let id = client_id_for("SIM-1");
        assert!(id.starts_with("sim-drone-SIM-1-"));
        assert_eq!(id.len(), "sim-drone-SIM-1-".len() + 8);
        assert_ne!(id, client_id_for("SIM-1"));
    }

    #[tokio::test]
    async fn ack_tracker_settles_in_submission_order() {
        let tracker = AckTracker::default();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        tracker.enqueue(first_tx);
        tracker.enqueue(second_tx);

        tracker.assign(0);
        tracker.assign(7);
        tracker.assign(8);
        tracker.acknowledge(7);

        assert!(first_rx.await.is_ok());
        assert!(second_rx.try_recv().is_err());

        tracker.acknowledge(8);
        assert!(second_rx.await.is_ok());
    }

    #[tokio::test]
    async fn ack_tracker_failure_releases_waiters() {
        let tracker = AckTracker::default();
        let (queued_tx, queued_rx) = oneshot::channel();
        let (inflight_tx, inflight_rx) = oneshot::channel();
        tracker.enqueue(inflight_tx);
        tracker.assign(1);
        tracker.enqueue(queued_tx);

        tracker.fail_all();
        assert!(queued_rx.await.is_err());
        assert!(inflight_rx.await.is_err());
    }
}
