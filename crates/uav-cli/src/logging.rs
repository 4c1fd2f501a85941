//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 4] = ["uav_cli", "uav_sdk", "uav_core", "sim_drone"];

/// Filter from `RUST_LOG` when it is set, otherwise our crates at info
/// (debug with `--debug`).
pub fn filter(debug: bool) -> anyhow::Result<EnvFilter> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(env.as_deref(), debug)
}

fn filter_from(env: Option<&str>, debug: bool) -> anyhow::Result<EnvFilter> {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(err) => eprintln!("Ignoring invalid {}: {}", EnvFilter::DEFAULT_ENV, err),
        }
    }

    let level = if debug { "debug" } else { "info" };
    let mut filter = EnvFilter::default();
    for krate in CRATES {
        filter = filter.add_directive(format!("{}={}", krate, level).parse()?);
    }
    Ok(filter)
}

pub fn init(debug: bool, json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter(debug)?);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
