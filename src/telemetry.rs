//! Logging initialization.
//!
//! Events and spans go to stderr, as text or one JSON object per line
//! (`log.format`). The filter comes from `RUST_LOG` when set, otherwise from
//! `log.level`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::{LogConfig, LogFormat};

/// Build the filter: `RUST_LOG` first, then the configured level, then
/// `info` if the configured level does not parse.
#[must_use]
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (for example by a
/// test harness); logging then goes wherever that one sends it.
pub fn init(config: &LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(filter(config));
    let installed = match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_falls_back() {
        let cfg = LogConfig {
            level: "not a [directive".to_owned(),
            format: LogFormat::Text,
        };
        // Must not panic regardless of RUST_LOG.
        let _ = filter(&cfg);
    }

    #[test]
    fn second_init_reports_already_installed() {
        let cfg = LogConfig::default();
        let _ = init(&cfg);
        assert!(!init(&cfg));
    }
}
