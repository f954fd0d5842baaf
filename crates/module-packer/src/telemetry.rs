#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the logging filter (overrides `RUST_LOG`).
pub const LOG_ENV: &str = "MODULE_PACKER_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Resolve the logging filter to use for subscriber initialisation.
pub fn resolve_env_filter() -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string())
}

/// Install a stderr `fmt` subscriber so log lines never mix with prompts.
pub fn install() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::new(resolve_env_filter()))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
