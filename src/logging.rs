//! Diagnostic logging set-up.
//!
//! Logs go to stderr so stdout stays reserved for command summaries. The
//! level comes from `RUST_LOG` when set, otherwise from `-v` repetitions,
//! otherwise from `[logging].level`.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive for the given config and `-v` count.
pub fn filter_directive(config: &LoggingConfig, verbose: u8) -> String {
    match verbose {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config, verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directive(&config, 0), "info");
        assert_eq!(filter_directive(&config, 1), "debug");
        assert_eq!(filter_directive(&config, 3), "trace");
    }
}
