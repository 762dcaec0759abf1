use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "reel_tv=debug";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
