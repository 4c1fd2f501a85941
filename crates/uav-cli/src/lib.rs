//! UAV CLI - simulated drone process.
//!
//! - config: command line arguments and validated settings
//! - logging: tracing subscriber setup
//! - orchestrator: register, await approval, go live, shut down

pub mod config;
pub mod logging;
pub mod orchestrator;

pub use config::{Args, ConfigError, SimConfig};
pub use orchestrator::{Orchestrator, RunOutcome};
