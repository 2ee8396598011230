//! Exovision trainer - offline tree-ensemble training
//!
//! Turns a NASA KOI table into the JSON artifact served by
//! `exovision-ai-core`, with reproducible output for a fixed seed.

pub mod artifacts;
pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod evaluation;
pub mod trainer;

use exovision_ai_core::gbdt::TreeEnsemble;
use exovision_ai_core::{FEATURE_COLUMNS, FEATURE_COUNT};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub use artifacts::{write_artifacts, ArtifactPaths};
pub use dataset::{
    Dataset, FeatureStats, Imputation, LabelSource, DISPOSITION_COLUMN, POSITIVE_DISPOSITION,
};
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::TrainerError;
pub use evaluation::{evaluate, EvaluationReport};
pub use trainer::{FeatureImportance, Trainer, TrainingParams};

/// Everything a training run needs besides the data.
#[derive(Clone, Debug)]
pub struct TrainingOptions {
    pub label: LabelSource,
    pub imputation: Imputation,
    pub test_fraction: f64,
    pub params: TrainingParams,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            label: LabelSource::Disposition,
            imputation: Imputation::Median,
            test_fraction: 0.2,
            params: TrainingParams::default(),
        }
    }
}

/// Result of a training run.
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    pub model: TreeEnsemble,
    pub importance: Vec<FeatureImportance>,
    /// Hold-out report; `None` when the test split is empty
    pub evaluation: Option<EvaluationReport>,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Train directly from a CSV file.
pub fn train_model_from_csv(
    path: &Path,
    options: &TrainingOptions,
) -> Result<TrainingOutcome, TrainerError> {
    let dataset = Dataset::from_csv(path, &options.label)?;
    train_on_dataset(&dataset, options)
}

/// Impute, split, fit and evaluate.
pub fn train_on_dataset(
    dataset: &Dataset,
    options: &TrainingOptions,
) -> Result<TrainingOutcome, TrainerError> {
    if !(0.0..1.0).contains(&options.test_fraction) {
        return Err(TrainerError::Training(format!(
            "test_fraction must be in [0, 1), got {}",
            options.test_fraction
        )));
    }

    if options.imputation == Imputation::Median {
        warn!("Training with median imputation; serving fills missing values with 0.0");
    }
    let imputed = dataset.impute(options.imputation);
    let (train, test) = dataset.stratified_split(options.test_fraction, options.params.seed);
    if train.is_empty() {
        return Err(TrainerError::Dataset("train split is empty".into()));
    }
    info!(train = train.len(), test = test.len(), "Split dataset");

    let gather = |rows: &[usize]| -> (Vec<[f64; FEATURE_COUNT]>, Vec<u8>) {
        rows.iter()
            .map(|&i| (imputed.features[i], dataset.labels[i]))
            .unzip()
    };
    let (train_x, train_y) = gather(&train);
    let (test_x, test_y) = gather(&test);

    let trained = Trainer::new(options.params.clone()).train(&train_x, &train_y)?;
    let mut model = trained.ensemble;

    model.metadata.insert(
        "imputation".into(),
        serde_json::to_value(options.imputation)?,
    );
    if options.imputation == Imputation::Median {
        let medians: BTreeMap<&str, f64> =
            FEATURE_COLUMNS.iter().copied().zip(imputed.fill).collect();
        model
            .metadata
            .insert("training_medians".into(), serde_json::to_value(medians)?);
    }
    let label_source = match &options.label {
        LabelSource::Disposition => format!("{DISPOSITION_COLUMN}=={POSITIVE_DISPOSITION}"),
        LabelSource::Column(name) => name.clone(),
    };
    model
        .metadata
        .insert("label_source".into(), serde_json::Value::from(label_source));

    let evaluation = if test.is_empty() {
        warn!("Test split is empty; skipping evaluation");
        None
    } else {
        let report = evaluate(&model, &test_x, &test_y)?;
        report.log_summary();
        Some(report)
    };

    Ok(TrainingOutcome {
        model,
        importance: trained.importance,
        evaluation,
        train_rows: train.len(),
        test_rows: test.len(),
    })
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
