//! Error types for the serving core

use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring a model artifact into the store.
///
/// A failed load never touches the currently active model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Nothing exists at the configured artifact path
    #[error("Model file not found at {}", .0.display())]
    NotFound(PathBuf),

    /// The artifact exists but could not be read, decoded or validated
    #[error("Model artifact {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn corrupt<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure raised by a classifier while scoring a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("model expects {expected} features, got {got}")]
    FeatureCountMismatch { expected: usize, got: usize },

    #[error("tree {tree} could not be evaluated: {reason}")]
    MalformedTree { tree: usize, reason: String },

    #[error("model produced a non-finite score")]
    NonFiniteScore,

    #[error("inference failed: {0}")]
    Internal(String),
}

/// Failure while reading a delimited-text upload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TabularError {
    #[error("file has no header row")]
    MissingHeader,

    #[error("row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("row {row}, column `{column}`: `{value}` is not a number")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
}

/// Errors surfaced by the prediction service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Batch size too large ({size} > max {limit})")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Invalid tabular data: {0}")]
    InvalidFormat(String),

    #[error("File must be a CSV: {0}")]
    NotATable(String),

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),
}

impl From<InferenceError> for ServiceError {
    fn from(err: InferenceError) -> Self {
        ServiceError::PredictionFailed(err.to_string())
    }
}

impl From<TabularError> for ServiceError {
    fn from(err: TabularError) -> Self {
        ServiceError::InvalidFormat(err.to_string())
    }
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
