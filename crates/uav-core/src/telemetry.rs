//! Telemetry drift model.
//!
//! Advances [`DeviceState`] by a small random walk each tick so the published
//! frames look like a drone idling in place. There is no flight dynamics
//! here; GOTO and TAKEOFF jumps come from the command rules.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{DeviceState, FlightMode, TelemetryFrame};

/// Per-tick battery drain bounds, in percent.
const BATTERY_DRAIN_MIN: f64 = 0.001;
const BATTERY_DRAIN_MAX: f64 = 0.005;

/// Maximum GPS drift per tick, in degrees (~1 m).
const POSITION_DRIFT_DEG: f64 = 0.00001;

const SIGNAL_MIN: f64 = 60.0;
const SIGNAL_MAX: f64 = 100.0;
const SIGNAL_STEP: f64 = 1.0;

const SATELLITES_MIN: u32 = 4;
const SATELLITES_MAX: u32 = 20;
const SATELLITE_CHANGE_PROBABILITY: f64 = 0.05;

const TEMPERATURE_STEP: f64 = 0.1;

/// Initial position supplied by configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Advances device state and produces telemetry frames.
///
/// Deterministic for a given seed, which the tests rely on.
pub struct TelemetryGenerator<R = StdRng> {
    rng: R,
}

impl TelemetryGenerator<StdRng> {
    /// Generator seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_os_rng())
    }

    /// Generator with a fixed seed for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> TelemetryGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Randomized start-up state at `position`: full battery, hovering,
    /// 8-16 satellites, strong signal and a mild airframe temperature.
    pub fn initial_state(&mut self, position: Position) -> DeviceState {
        DeviceState {
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            heading: self.rng.random_range(0.0..359.0),
            speed: 0.0,
            battery_level: 100.0,
            battery_voltage: DeviceState::voltage_for(100.0),
            satellites: self.rng.random_range(8..=16),
            signal_strength: self.rng.random_range(80.0..=SIGNAL_MAX),
            temperature: self.rng.random_range(25.0..30.0),
            flight_mode: FlightMode::Hover,
        }
    }

    /// Advance `state` by one tick of the drift model.
    pub fn advance(&mut self, state: &mut DeviceState) {
        let drain = self.rng.random_range(BATTERY_DRAIN_MIN..=BATTERY_DRAIN_MAX);
        state.battery_level = (state.battery_level - drain).max(0.0);
        state.battery_voltage = DeviceState::voltage_for(state.battery_level);

        if !state.flight_mode.holds_position() {
            state.latitude += self
                .rng
                .random_range(-POSITION_DRIFT_DEG..=POSITION_DRIFT_DEG);
            state.longitude += self
                .rng
                .random_range(-POSITION_DRIFT_DEG..=POSITION_DRIFT_DEG);
        }

        state.signal_strength = (state.signal_strength
            + self.rng.random_range(-SIGNAL_STEP..=SIGNAL_STEP))
        .clamp(SIGNAL_MIN, SIGNAL_MAX);

        if self.rng.random_bool(SATELLITE_CHANGE_PROBABILITY) {
            let satellites = if self.rng.random_bool(0.5) {
                state.satellites.saturating_add(1)
            } else {
                state.satellites.saturating_sub(1)
            };
            state.satellites = satellites.clamp(SATELLITES_MIN, SATELLITES_MAX);
        }

        state.temperature += self
            .rng
            .random_range(-TEMPERATURE_STEP..=TEMPERATURE_STEP);
    }

    /// Advance `state` and capture the resulting frame.
    pub fn tick(
        &mut self,
        state: &mut DeviceState,
        drone_id: &str,
        timestamp: DateTime<Utc>,
    ) -> TelemetryFrame {
        self.advance(state);
        TelemetryFrame::capture(drone_id, state, timestamp)
    }
}
