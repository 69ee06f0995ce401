//! Error types for the telemetry pipeline.
//!
//! These surface only at setup boundaries and from the transport seam.
//! Capture paths log and drop them instead of returning them to the host.

use thiserror::Error;

/// Errors that can occur in the telemetry pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Options could not be loaded or are unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to serialize telemetry event
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to hand a batch to the delivery mechanism
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// API used before the monitor was initialized
    #[error("Telemetry is not initialized")]
    NotInitialized,

    /// The host cannot run the pipeline (for example, server-side rendering)
    #[error("Telemetry requires a browser-like environment")]
    UnsupportedEnvironment,
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::NotInitialized;
        assert_eq!(err.to_string(), "Telemetry is not initialized");

        let err = TelemetryError::Transport("no async runtime".to_string());
        assert_eq!(err.to_string(), "Transport error: no async runtime");

        let err = TelemetryError::UnsupportedEnvironment;
        assert_eq!(
            err.to_string(),
            "Telemetry requires a browser-like environment"
        );
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err: Result<(), serde_json::Error> =
            serde_json::from_str::<()>("invalid json");
        let telemetry_err: TelemetryError = json_err.unwrap_err().into();
        assert!(matches!(telemetry_err, TelemetryError::Serialization(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TelemetryError = io.into();
        assert!(matches!(err, TelemetryError::Io(_)));
    }
}
