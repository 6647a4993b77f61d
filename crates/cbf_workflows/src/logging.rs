//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "cbf_workflows=info,pipeline=info";

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// info-level output for the pipeline crates.
///
/// Errors if a global subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    tracing::debug!("Logging initialised");
    Ok(())
}
