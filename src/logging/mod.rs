//! Logging infrastructure

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use crate::{Result, Error};
use crate::config::{LogFormat, LoggingConfig};

/// Build the filter for a configured level string
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::ConfigError(format!("Invalid log level: {}", e)))
}

/// Initialize the logging system
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::ConfigError(format!("Logger already installed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("hackrf_emitter=debug,warn").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        assert!(matches!(build_filter("hackrf_emitter=loud"), Err(Error::ConfigError(_))));
    }
}
