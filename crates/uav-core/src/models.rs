//! Core data models for the simulated drone.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Battery voltage at 0% charge.
pub const BATTERY_VOLTAGE_EMPTY: f64 = 10.8;
/// Battery voltage at 100% charge.
pub const BATTERY_VOLTAGE_FULL: f64 = 12.6;

/// Flight mode reported in telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    #[default]
    Hover,
    Takeoff,
    Land,
    Rtl,
    Goto,
}

impl FlightMode {
    /// Modes in which the position is held, so GPS drift is not simulated.
    pub fn holds_position(self) -> bool {
        matches!(self, FlightMode::Land | FlightMode::Rtl)
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightMode::Hover => write!(f, "HOVER"),
            FlightMode::Takeoff => write!(f, "TAKEOFF"),
            FlightMode::Land => write!(f, "LAND"),
            FlightMode::Rtl => write!(f, "RTL"),
            FlightMode::Goto => write!(f, "GOTO"),
        }
    }
}

/// Mutable record of the simulated airframe.
///
/// Shared between the telemetry loop and the command handler; callers must
/// hold the session's state lock for every read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    /// Remaining charge in percent, `0.0..=100.0`.
    pub battery_level: f64,
    pub battery_voltage: f64,
    pub satellites: u32,
    /// Link quality in percent, kept within `60.0..=100.0`.
    pub signal_strength: f64,
    pub temperature: f64,
    pub flight_mode: FlightMode,
}

impl DeviceState {
    /// Voltage derived linearly from the remaining charge.
    pub fn voltage_for(battery_level: f64) -> f64 {
        BATTERY_VOLTAGE_EMPTY
            + (battery_level / 100.0) * (BATTERY_VOLTAGE_FULL - BATTERY_VOLTAGE_EMPTY)
    }
}

/// One serialized snapshot of [`DeviceState`] published on the telemetry topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    pub drone_id: String,
    pub timestamp: DateTime<Utc>,
    pub battery_level: f64,
    pub battery_voltage: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub satellites: u32,
    pub signal_strength: f64,
    pub flight_mode: FlightMode,
    pub temperature: f64,
}

impl TelemetryFrame {
    /// Capture the current state. Battery, signal and temperature readings
    /// are rounded to two decimals as the backend displays them.
    pub fn capture(drone_id: &str, state: &DeviceState, timestamp: DateTime<Utc>) -> Self {
        Self {
            drone_id: drone_id.to_string(),
            timestamp,
            battery_level: round2(state.battery_level),
            battery_voltage: round2(state.battery_voltage),
            latitude: state.latitude,
            longitude: state.longitude,
            altitude: state.altitude,
            speed: state.speed,
            heading: state.heading,
            satellites: state.satellites,
            signal_strength: round2(state.signal_strength),
            flight_mode: state.flight_mode,
            temperature: round2(state.temperature),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ========== COMMAND MODELS ==========

/// Command kinds understood by the simulator.
///
/// Kinds the simulator does not know are preserved as [`CommandKind::Other`]
/// so they can still be answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    Takeoff,
    Land,
    Rtl,
    Goto,
    Arm,
    Disarm,
    Other(String),
}

impl From<String> for CommandKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TAKEOFF" => CommandKind::Takeoff,
            "LAND" => CommandKind::Land,
            "RTL" => CommandKind::Rtl,
            "GOTO" => CommandKind::Goto,
            "ARM" => CommandKind::Arm,
            "DISARM" => CommandKind::Disarm,
            _ => CommandKind::Other(value),
        }
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Takeoff => write!(f, "TAKEOFF"),
            CommandKind::Land => write!(f, "LAND"),
            CommandKind::Rtl => write!(f, "RTL"),
            CommandKind::Goto => write!(f, "GOTO"),
            CommandKind::Arm => write!(f, "ARM"),
            CommandKind::Disarm => write!(f, "DISARM"),
            CommandKind::Other(other) => write!(f, "{}", other),
        }
    }
}

/// Command received on the command topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Target drone as addressed by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<String>,
    /// Issue time as sent by the backend (ISO string or epoch number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Outcome status reported back for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Received,
    InProgress,
    Success,
    Failed,
    Rejected,
    Deferred,
}

/// Acknowledgement published on the response topic, once per command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command_id: String,
    pub drone_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: CommandStatus,
    pub message: String,
}
