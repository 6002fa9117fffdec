//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem for binaries
//! - Configure log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Library code only emits events; installing a subscriber is the binary's job

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter directive for the configured level.
pub fn filter_directive(config: &ObservabilityConfig) -> String {
    format!("circuit_state={}", config.log_level.to_ascii_lowercase())
}

/// Install the global fmt subscriber. Later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        let config = ObservabilityConfig {
            log_level: "DEBUG".to_string(),
        };
        assert_eq!(filter_directive(&config), "circuit_state=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = ObservabilityConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
