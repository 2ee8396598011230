use exovision_ai_core::gbdt::ModelError;
use exovision_ai_core::InferenceError;
use thiserror::Error;

/// Errors returned by the offline trainer.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("evaluation error: {0}")]
    Inference(#[from] InferenceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
