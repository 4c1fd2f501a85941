//! Simulator configuration from the command line.

use std::time::Duration;

use chrono::Local;
use clap::Parser;
use thiserror::Error;
use uav_core::{Position, RegistrationRequest, ValidationError};
use uav_sdk::UnknownCommandPolicy;
use uuid::Uuid;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_MODEL: &str = "Simulator-X1";

/// Simulated drone: registers with the backend, waits for approval, then
/// streams telemetry over MQTT and answers commands.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Drone serial number (default: SIM-DRONE-<random>)
    #[arg(long)]
    pub serial: Option<String>,

    /// Drone model
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Free-text notes sent with the registration
    #[arg(long)]
    pub notes: Option<String>,

    /// Backend API base URL
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Registration status poll interval in seconds
    #[arg(long, default_value_t = 5.0)]
    pub poll_interval: f64,

    /// Telemetry publish interval in seconds
    #[arg(long, default_value_t = 1.0)]
    pub telemetry_interval: f64,

    /// Initial latitude
    #[arg(long, default_value_t = 22.543099, allow_negative_numbers = true)]
    pub lat: f64,

    /// Initial longitude
    #[arg(long, default_value_t = 114.057868, allow_negative_numbers = true)]
    pub lon: f64,

    /// Initial altitude in meters
    #[arg(long, default_value_t = 10.0)]
    pub alt: f64,

    /// Answer unsupported command types with SUCCESS instead of REJECTED
    #[arg(long)]
    pub ack_unknown_commands: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got {value}")]
    Interval { name: &'static str, value: f64 },
    #[error("initial position ({lat}, {lon}) is out of range")]
    Position { lat: f64, lon: f64 },
    #[error("initial altitude must be finite, got {0}")]
    Altitude(f64),
    #[error("invalid registration identity: {0}")]
    Identity(#[from] ValidationError),
}

/// Validated, immutable simulator settings.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub registration: RegistrationRequest,
    pub api_url: String,
    pub poll_interval: Duration,
    pub telemetry_interval: Duration,
    pub position: Position,
    pub unknown_commands: UnknownCommandPolicy,
}

impl SimConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let serial = args.serial.unwrap_or_else(default_serial);
        let notes = args.notes.or_else(|| {
            Some(format!(
                "Simulated drone created by sim_drone at {}",
                Local::now().to_rfc3339()
            ))
        });
        let registration = RegistrationRequest::new(serial, args.model, notes)?;

        if !(-90.0..=90.0).contains(&args.lat) || !(-180.0..=180.0).contains(&args.lon) {
            return Err(ConfigError::Position {
                lat: args.lat,
                lon: args.lon,
            });
        }
        if !args.alt.is_finite() {
            return Err(ConfigError::Altitude(args.alt));
        }

        Ok(Self {
            registration,
            api_url: args.api_url,
            poll_interval: seconds("poll interval", args.poll_interval)?,
            telemetry_interval: seconds("telemetry interval", args.telemetry_interval)?,
            position: Position {
                latitude: args.lat,
                longitude: args.lon,
                altitude: args.alt,
            },
            unknown_commands: if args.ack_unknown_commands {
                UnknownCommandPolicy::Acknowledge
            } else {
                UnknownCommandPolicy::Reject
            },
        })
    }

    pub fn serial(&self) -> &str {
        self.registration.serial_number()
    }
}

fn default_serial() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("SIM-DRONE-{}", suffix[..8].to_uppercase())
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Interval { name, value });
    }
    Ok(Duration::from_secs_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sim_drone").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_simulator_conventions() {
        let config = SimConfig::from_args(parse(&[])).unwrap();

        assert!(config.serial().starts_with("SIM-DRONE-"));
        assert_eq!(config.serial().len(), "SIM-DRONE-".len() + 8);
        assert_eq!(config.registration.model(), DEFAULT_MODEL);
        assert!(config.registration.notes().is_some());
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.telemetry_interval, Duration::from_secs(1));
        assert_eq!(config.position.latitude, 22.543099);
        assert_eq!(config.unknown_commands, UnknownCommandPolicy::Reject);
    }

    #[test]
    fn explicit_values_are_used() {
        let config = SimConfig::from_args(parse(&[
            "--serial",
            "SIM-1",
            "--model",
            "X1",
            "--poll-interval",
            "0.5",
            "--lat",
            "-33.9",
            "--lon",
            "-118.4",
            "--ack-unknown-commands",
        ]))
        .unwrap();

        assert_eq!(config.serial(), "SIM-1");
        assert_eq!(config.registration.model(), "X1");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.position.latitude, -33.9);
        assert_eq!(config.position.longitude, -118.4);
        assert_eq!(config.unknown_commands, UnknownCommandPolicy::Acknowledge);
    }

    #[test]
    fn rejects_bad_intervals_and_positions() {
        assert!(matches!(
            SimConfig::from_args(parse(&["--telemetry-interval", "0"])),
            Err(ConfigError::Interval { .. })
        ));
        assert!(matches!(
            SimConfig::from_args(parse(&["--lat", "91"])),
            Err(ConfigError::Position { .. })
        ));
        assert!(matches!(
            SimConfig::from_args(parse(&["--serial", "bad serial"])),
            Err(ConfigError::Identity(_))
        ));
    }
}
