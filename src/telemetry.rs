use crate::config::GuardConfig;
use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| anyhow!("invalid log filter '{default_filter}': {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("tracing subscriber already installed: {e}"))
}

/// [`init_tracing`] with the filter resolved into `config`.
pub fn init_tracing_from(config: &GuardConfig) -> Result<()> {
    init_tracing(&config.log_filter)
}
