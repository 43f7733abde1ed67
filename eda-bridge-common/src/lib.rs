//! EDA bridge common library
//!
//! Shared support code for the Modbus HTTP bridge:
//!
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;

pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// The filter comes from `RUST_LOG` when it is set and valid, otherwise from
/// `config.level`. A `level_override` (e.g. from `--verbose`) is added on top
/// of either, so it raises the default level even when `RUST_LOG` is set.
///
/// # Example
///
/// ```ignore
/// use eda_bridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config, None)?;
/// ```
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env.as_deref(), &config.level, level_override)?;

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Logging(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Logging(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}

fn build_filter(
    env: Option<&str>,
    level: &str,
    level_override: Option<&str>,
) -> Result<tracing_subscriber::EnvFilter> {
    use tracing_subscriber::EnvFilter;

    let filter = env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    match level_override {
        Some(level) => {
            let directive = level
                .parse()
                .map_err(|e| Error::Logging(format!("Invalid log level '{}': {}", level, e)))?;
            Ok(filter.add_directive(directive))
        }
        None => Ok(filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_filter_uses_config_level() {
        let filter = build_filter(None, "warn", None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_filter_prefers_env() {
        let filter = build_filter(Some("error"), "info", None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));
    }

    #[test]
    fn test_filter_override_applies_over_env() {
        let filter = build_filter(Some("warn"), "info", Some("debug")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let filter = build_filter(None, "info", Some("debug")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_filter_invalid_override() {
        assert!(build_filter(None, "info", Some("bridge=loud")).is_err());
    }
}
