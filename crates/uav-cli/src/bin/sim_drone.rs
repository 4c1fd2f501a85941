//! Simulated drone.
//!
//! Usage:
//!   sim_drone --api-url http://localhost:8080/api/v1 --serial SIM-DRONE-0001
//!
//! Exit codes: 0 after Ctrl-C, 1 on a fatal error, 2 when the registration is rejected.

use std::process::ExitCode;

use clap::Parser;
use uav_cli::{logging, Args, Orchestrator, RunOutcome, SimConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = logging::init(args.debug, args.log_json) {
        eprintln!("Failed to initialize logging: {:#}", err);
        return ExitCode::from(1);
    }

    let config = match SimConfig::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            return ExitCode::from(1);
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Unable to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    match Orchestrator::new(config).run(shutdown).await {
        Ok(RunOutcome::Interrupted) => {
            tracing::info!("Simulator stopped");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Rejected { message }) => {
            tracing::warn!("Exiting: registration rejected ({})", message);
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!("Simulator failed: {:#}", err);
            ExitCode::from(1)
        }
    }
}
