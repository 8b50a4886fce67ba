//! Error types for the forecasting engine

use thiserror::Error;

/// Result type alias for forecasting operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("None of the target columns {requested:?} were found; available columns: {available:?}")]
    MissingTarget {
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("Batch {start}..{end} failed: {reason}")]
    BatchFit {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("Report generation error: {0}")]
    ReportGeneration(String),

    #[error("Corrupt model artifact: {0}")]
    CorruptArtifact(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

impl From<polars::error::PolarsError> for ForecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        ForecastError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ForecastError {
    fn from(err: ndarray::ShapeError) -> Self {
        ForecastError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ForecastError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_batch_error_display() {
        let err = ForecastError::BatchFit {
            start: 500,
            end: 1000,
            reason: "target contains NaN".to_string(),
        };
        assert_eq!(err.to_string(), "Batch 500..1000 failed: target contains NaN");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ForecastError = io_err.into();
        assert!(matches!(err, ForecastError::IoError(_)));
    }
}
