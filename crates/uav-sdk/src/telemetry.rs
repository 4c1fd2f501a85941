//! Periodic telemetry publishing.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use uav_core::TelemetryGenerator;

use crate::publish::{Delivery, Publish};
use crate::state::SharedDeviceState;

/// Advances the shared device state and publishes one frame per interval.
pub struct TelemetryLoop<P> {
    state: SharedDeviceState,
    generator: TelemetryGenerator,
    publisher: P,
    topic: String,
    drone_id: String,
    interval: Duration,
}

impl<P: Publish> TelemetryLoop<P> {
    pub fn new(
        state: SharedDeviceState,
        generator: TelemetryGenerator,
        publisher: P,
        topic: impl Into<String>,
        drone_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            generator,
            publisher,
            topic: topic.into(),
            drone_id: drone_id.into(),
            interval,
        }
    }

    /// Run until `shutdown` fires. The first frame goes out immediately.
    /// Returns the number of frames the publisher accepted.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut published = 0u64;

        tracing::info!(
            "Publishing telemetry to {} every {:?}",
            self.topic,
            self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Telemetry loop shutting down after {} frames", published);
                    break;
                }
                _ = ticker.tick() => {
                    let frame = {
                        let mut state = self.state.lock().await;
                        self.generator.tick(&mut state, &self.drone_id, Utc::now())
                    };

                    let payload = match serde_json::to_vec(&frame) {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!("Failed to encode telemetry frame: {}", err);
                            continue;
                        }
                    };

                    // At-most-once: a failed frame is dropped, the next tick replaces it.
                    match self.publisher.publish(&self.topic, payload, Delivery::AtMostOnce).await {
                        Ok(()) => {
                            published += 1;
                            tracing::debug!(
                                battery = frame.battery_level,
                                mode = %frame.flight_mode,
                                "Published telemetry frame {}",
                                published
                            );
                        }
                        Err(err) => tracing::warn!("Telemetry publish failed: {}", err),
                    }
                }
            }
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::testing::RecordingPublisher;
    use uav_core::{FlightMode, Position};

    fn setup(seed: u64) -> (SharedDeviceState, TelemetryGenerator) {
        let mut generator = TelemetryGenerator::seeded(seed);
        let state = generator.initial_state(Position {
            latitude: 22.543099,
            longitude: 114.057868,
            altitude: 10.0,
        });
        (SharedDeviceState::new(state), generator)
    }

    #[tokio::test(start_paused = true)]
    async fn three_ticks_publish_three_frames() {
        let (state, generator) = setup(1);
        let publisher = RecordingPublisher::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let telemetry = TelemetryLoop::new(
            state,
            generator,
            publisher.clone(),
            "drones/d-1/telemetry",
            "SIM-1",
            Duration::from_secs(1),
        );
        let task = tokio::spawn(telemetry.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        shutdown_tx.send(()).unwrap();
        let count = task.await.unwrap();

        let frames = publisher.published();
        assert_eq!(count, 3);
        assert_eq!(frames.len(), 3);

        let mut previous = f64::MAX;
        for frame in &frames {
            assert_eq!(frame.topic, "drones/d-1/telemetry");
            assert_eq!(frame.delivery, Delivery::AtMostOnce);
            assert_eq!(frame.payload["droneId"], "SIM-1");
            let battery = frame.payload["batteryLevel"].as_f64().unwrap();
            assert!(battery <= previous);
            previous = battery;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn frames_reflect_shared_state_changes() {
        let (state, generator) = setup(2);
        let publisher = RecordingPublisher::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(
            TelemetryLoop::new(
                state.clone(),
                generator,
                publisher.clone(),
                "drones/d-1/telemetry",
                "SIM-1",
                Duration::from_secs(1),
            )
            .run(shutdown_rx),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        state.lock().await.flight_mode = FlightMode::Land;
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        let frames = publisher.published();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload["flightMode"], "HOVER");
        assert_eq!(frames[1].payload["flightMode"], "LAND");
    }
}
