//! Command rules: how each command kind changes [`DeviceState`].

use serde_json::Value;

use crate::models::{Command, CommandKind, DeviceState, FlightMode};

/// Altitude used by TAKEOFF when no `altitude` parameter is given.
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f64 = 10.0;

/// Result of applying a command to the device state.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// State updated (or nothing to update, for ARM/DISARM).
    Applied { message: String },
    /// A parameter was present but unusable; state untouched.
    Invalid { reason: String },
    /// Kind the simulator does not implement; state untouched.
    Unrecognized { kind: String },
}

/// Apply `command` to `state`.
///
/// Parameters are validated before any field is written, so an
/// [`CommandOutcome::Invalid`] result never leaves a partial update.
pub fn apply_command(state: &mut DeviceState, command: &Command) -> CommandOutcome {
    match &command.kind {
        CommandKind::Takeoff => {
            let altitude = match param_f64(command, "altitude") {
                Ok(value) => value.unwrap_or(DEFAULT_TAKEOFF_ALTITUDE_M),
                Err(reason) => return CommandOutcome::Invalid { reason },
            };
            state.altitude = altitude;
            state.flight_mode = FlightMode::Takeoff;
            applied(format!("taking off to {:.1} m", altitude))
        }
        CommandKind::Land => {
            state.altitude = 0.0;
            state.flight_mode = FlightMode::Land;
            applied("landing".to_string())
        }
        CommandKind::Rtl => {
            state.flight_mode = FlightMode::Rtl;
            applied("returning to launch".to_string())
        }
        CommandKind::Goto => {
            match goto_target(state, command) {
                Ok((latitude, longitude, altitude)) => {
                    state.latitude = latitude;
                    state.longitude = longitude;
                    state.altitude = altitude;
                    state.flight_mode = FlightMode::Goto;
                    applied(format!(
                        "flying to ({:.6}, {:.6}) at {:.1} m",
                        latitude, longitude, altitude
                    ))
                }
                Err(reason) => CommandOutcome::Invalid { reason },
            }
        }
        CommandKind::Arm => applied("motors armed".to_string()),
        CommandKind::Disarm => applied("motors disarmed".to_string()),
        CommandKind::Other(kind) => CommandOutcome::Unrecognized { kind: kind.clone() },
    }
}

fn goto_target(state: &DeviceState, command: &Command) -> Result<(f64, f64, f64), String> {
    let latitude = param_f64(command, "latitude")?.unwrap_or(state.latitude);
    let longitude = param_f64(command, "longitude")?.unwrap_or(state.longitude);
    let altitude = param_f64(command, "altitude")?.unwrap_or(state.altitude);
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {} out of range", latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {} out of range", longitude));
    }
    Ok((latitude, longitude, altitude))
}

fn applied(message: String) -> CommandOutcome {
    CommandOutcome::Applied { message }
}

/// Read a numeric parameter. Numbers and numeric strings are accepted;
/// absent or null means "not given".
fn param_f64(command: &Command, key: &str) -> Result<Option<f64>, String> {
    let value = match command.parameters.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(format!("parameter '{}' is not a number: {}", key, value)),
    }
}
