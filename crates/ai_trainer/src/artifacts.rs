//! Output files of a training run

use crate::errors::TrainerError;
use crate::TrainingOutcome;
use exovision_ai_core::serialization::artifact_hash_hex;
use exovision_ai_core::store::FEATURE_NAMES_FILE;
use exovision_ai_core::FEATURE_COLUMNS;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MODEL_FILE: &str = "baseline.json";
pub const HASH_FILE: &str = "baseline.hash";
pub const METRICS_FILE: &str = "metrics.json";
pub const IMPORTANCE_FILE: &str = "feature_importance.json";

/// Where each artifact was written.
#[derive(Clone, Debug)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub hash: PathBuf,
    /// blake3 of the model file bytes, hex encoded
    pub hash_hex: String,
    pub feature_names: PathBuf,
    pub metrics: Option<PathBuf>,
    pub importance: PathBuf,
}

/// Write the model, its hash, the column listing, the evaluation report and
/// feature importances into `dir`.
pub fn write_artifacts(
    dir: &Path,
    outcome: &TrainingOutcome,
) -> Result<ArtifactPaths, TrainerError> {
    fs::create_dir_all(dir)?;

    let model = dir.join(MODEL_FILE);
    let canonical_json = outcome.model.to_canonical_json()?;
    fs::write(&model, &canonical_json)?;
    info!("Saving model to: {}", model.display());

    let hash_hex = artifact_hash_hex(canonical_json.as_bytes());
    let hash = dir.join(HASH_FILE);
    fs::write(&hash, &hash_hex)?;

    let feature_names = dir.join(FEATURE_NAMES_FILE);
    fs::write(&feature_names, FEATURE_COLUMNS.join("\n") + "\n")?;

    let metrics = match &outcome.evaluation {
        Some(report) => {
            let path = dir.join(METRICS_FILE);
            fs::write(&path, serde_json::to_string_pretty(report)?)?;
            Some(path)
        }
        None => None,
    };

    let importance = dir.join(IMPORTANCE_FILE);
    fs::write(&importance, serde_json::to_string_pretty(&outcome.importance)?)?;

    Ok(ArtifactPaths {
        model,
        hash,
        hash_hex,
        feature_names,
        metrics,
        importance,
    })
}
