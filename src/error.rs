//! Error types and handling for the emitter

use thiserror::Error;

/// Main error type for the emitter
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file or logging setup error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Rejected request (empty signal, non-positive duration, ...)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A transmission session is already in flight
    #[error("Transmission already active")]
    TransmissionActive,

    /// Capability tier cannot be used on this host
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend refused to start (process exited at once, native call failed)
    #[error("Launch failure: {0}")]
    LaunchFailure(String),

    /// Backend failed while a transmission was running
    #[error("Runtime failure: {0}")]
    RuntimeFailure(String),

    /// Native library error code
    #[error("HackRF error: {0}")]
    HackRfError(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    TimeoutError(String),

    /// Signal cache error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Shared library loading error
    #[error("Library error: {0}")]
    LibraryError(#[from] libloading::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error should surface to the caller of `start()` rather
    /// than trigger a fallback to the next tier.
    pub fn is_caller_facing(&self) -> bool {
        matches!(self, Error::ValidationError(_) | Error::TransmissionActive)
    }
}

/// Extension trait for converting crossbeam channel errors
pub trait ChannelErrorExt<T> {
    /// Convert a channel send error to our error type
    fn map_channel_err(self) -> Result<T>;
}

impl<T, E> ChannelErrorExt<T> for std::result::Result<T, crossbeam::channel::SendError<E>> {
    fn map_channel_err(self) -> Result<T> {
        self.map_err(|_| Error::RuntimeFailure("Worker channel send failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_facing_errors() {
        assert!(Error::TransmissionActive.is_caller_facing());
        assert!(Error::ValidationError("empty".into()).is_caller_facing());
        assert!(!Error::LaunchFailure("exit 1".into()).is_caller_facing());
        assert!(!Error::BackendUnavailable("no lib".into()).is_caller_facing());
    }

    #[test]
    fn test_channel_error_mapping() {
        let (tx, rx) = crossbeam::channel::bounded::<u8>(1);
        drop(rx);
        let err = tx.send(1).map_channel_err().unwrap_err();
        assert!(matches!(err, Error::RuntimeFailure(_)));
    }
}
