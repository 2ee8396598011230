//! The narrow interface the prediction service needs from a trained model

use crate::errors::InferenceError;
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Binary disposition of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    /// Class 0
    FalsePositive,
    /// Class 1
    Candidate,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        match self {
            Label::FalsePositive => 0,
            Label::Candidate => 1,
        }
    }

    /// Label for a positive-class probability; ties resolve to class 0.
    pub fn from_positive_probability(p: f64) -> Self {
        if p > 0.5 {
            Label::Candidate
        } else {
            Label::FalsePositive
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label.as_u8()
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::FalsePositive),
            1 => Ok(Label::Candidate),
            other => Err(format!("invalid label {other}")),
        }
    }
}

/// A trained binary classifier over contract-ordered feature vectors.
///
/// Implementations must be immutable once constructed: the model store
/// hands the same instance to concurrent requests.
pub trait Classifier: Send + Sync + Debug {
    /// Short name reported by model metadata.
    fn model_type(&self) -> &str;

    /// Number of inputs the model was trained on, when known.
    fn feature_count(&self) -> Option<usize>;

    /// Discrete label per input row.
    fn predict_labels(&self, batch: &[FeatureVector]) -> Result<Vec<Label>, InferenceError>;

    /// `[P(class 0), P(class 1)]` per input row.
    fn predict_proba(&self, batch: &[FeatureVector]) -> Result<Vec<[f64; 2]>, InferenceError>;
}
