//! Logging setup
//!
//! Installs a `tracing` subscriber for the server and device binaries.
//! `RUST_LOG` overrides the configured level when set.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub with_timestamp: bool,
    pub with_target: bool,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self { level, ..Default::default() }
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        let level = config.level.parse().map_err(LoggingError::InvalidConfiguration)?;
        Ok(LogConfig::new(level)
            .with_timestamp(config.with_timestamp)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = match (config.json_format, config.with_timestamp) {
        (true, true) => fmt::layer().json().with_target(config.with_target).boxed(),
        (true, false) => fmt::layer().json().without_time().with_target(config.with_target).boxed(),
        (false, true) => fmt::layer().with_target(config.with_target).boxed(),
        (false, false) => fmt::layer().without_time().with_target(config.with_target).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_from_logging_section() {
        let section = LoggingConfig { level: "warn".to_string(), ..Default::default() };
        let config = LogConfig::try_from(&section).unwrap();
        assert_eq!(config.level, LogLevel::Warn);

        let bad = LoggingConfig { level: "chatty".to_string(), ..Default::default() };
        assert!(matches!(
            LogConfig::try_from(&bad),
            Err(LoggingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever test installs first wins; the second attempt must error
        let _ = init_logging();
        assert!(init_logging().is_err());
    }
}
