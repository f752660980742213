//! Error types for export and configuration.

use thiserror::Error;

/// Error types for trace export operations
#[derive(Debug, Error)]
pub enum ExportError {
    /// The requested output format has no encoder
    #[error("unsupported trace format: {0}")]
    UnsupportedFormat(String),
    /// The pipeline forwards spans to an exporter and holds no window to dump
    #[error("pipeline is not capturing spans in memory")]
    NoInMemoryCapture,
    /// The pipeline has no exporter to forward spans to
    #[error("pipeline has no exporter configured")]
    NoExporter,
    /// Writing encoded bytes to the sink failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Transport-layer error reported by an external exporter
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ExportError::Io(err.into())
        } else {
            ExportError::Serialization(err.to_string())
        }
    }
}

/// Errors raised while loading pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable held a value that could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    /// The ring buffer must hold at least one span
    #[error("ring buffer length must be at least 1")]
    ZeroCapacity,
}
