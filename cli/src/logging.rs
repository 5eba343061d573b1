//! Tracing subscriber setup

use anyhow::anyhow;
use snapscrub_core::config::LoggingSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

/// Filter directive for the configured level and `-v` count
pub fn directive(configured: Option<&str>, verbose: u8) -> String {
    match verbose {
        0 => configured.unwrap_or(DEFAULT_DIRECTIVE).to_string(),
        1 => "info,snapscrub=debug,snapscrub_core=debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// `RUST_LOG` wins unless `-v` was given
pub fn init(settings: &LoggingSettings, verbose: u8) -> anyhow::Result<()> {
    let fallback = directive(settings.level.as_deref(), verbose);
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback))
    } else {
        EnvFilter::new(&fallback)
    };

    let registry = tracing_subscriber::registry().with(filter);
    let initialized = if settings.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    initialized.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
