//! Structured logging setup.
//!
//! The engine logs through `tracing` macros and `#[instrument]` spans. This
//! module installs a subscriber for consumers that do not bring their own.

use tracing_subscriber::EnvFilter;

/// Environment variable read for the log filter
pub const LOG_ENV_VAR: &str = "RESOLUTE_LOG";

/// Filter applied when `RESOLUTE_LOG` is unset or invalid
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format for the log subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install a global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed, which makes this safe
/// to call from every test.
pub fn init_logging(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init_logging(LogFormat::Text);
        assert!(!init_logging(LogFormat::Json));
    }

    #[test]
    fn test_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
