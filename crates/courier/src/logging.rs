//! Log output setup.

use tracing_subscriber::{EnvFilter, fmt};
use crate::config::LoggingSettings;
use crate::error::ConfigError;

/// Builds the filter: an explicit `filter` setting wins, then `RUST_LOG`,
/// then the plain `level`.
pub fn env_filter(settings: &LoggingSettings) -> Result<EnvFilter, ConfigError> {
    if let Some(directives) = &settings.filter {
        return EnvFilter::try_new(directives).map_err(|e| ConfigError::Invalid {
            key: "logging.filter",
            reason: e.to_string(),
        });
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&settings.level).map_err(|e| ConfigError::Invalid {
        key: "logging.level",
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Calling it twice is an error.
pub fn init(settings: &LoggingSettings) -> Result<(), ConfigError> {
    fmt::Subscriber::builder()
        .with_env_filter(env_filter(settings)?)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| ConfigError::Invalid {
            key: "logging",
            reason: e.to_string(),
        })
}
