//! Prediction orchestration
//!
//! Each operation snapshots the active model once, projects its records
//! and scores the whole set against that single instance.

use crate::classifier::Label;
use crate::errors::{Result, ServiceError};
use crate::features::{CatalogId, FeatureRecord, FeatureVector};
use crate::store::{ModelRef, ModelStore};
use crate::tabular;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest batch or file accepted by default.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Request-size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimits {
    pub max_batch_size: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// Label, confidence and pass-through identifier for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: Label,
    /// Maximum class posterior, in `[0, 1]`
    pub probability: f64,
    pub kepid: Option<CatalogId>,
}

/// An uploaded file together with its declared format.
#[derive(Debug, Clone, Default)]
pub struct TabularUpload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl TabularUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: Some(filename.into()),
            content_type: None,
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularPrediction {
    pub predictions: Vec<PredictionResult>,
    pub filename: Option<String>,
}

/// Stateless front for the model store.
#[derive(Debug, Clone)]
pub struct PredictionService {
    store: Arc<ModelStore>,
    limits: ServiceLimits,
}

impl PredictionService {
    pub fn new(store: Arc<ModelStore>, limits: ServiceLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    /// Score a single record.
    pub fn predict_one(&self, record: &FeatureRecord) -> Result<PredictionResult> {
        let model = self.snapshot()?;
        let mut results = score(&model, std::slice::from_ref(record))?;
        results.pop().ok_or_else(|| {
            ServiceError::PredictionFailed("model returned no result for the record".into())
        })
    }

    /// Score an ordered batch. Nothing is scored when the batch is over the
    /// limit, and one failing record fails the whole batch.
    pub fn predict_batch(&self, records: &[FeatureRecord]) -> Result<Vec<PredictionResult>> {
        let model = self.snapshot()?;
        self.check_size(records.len())?;
        score(&model, records)
    }

    /// Parse an uploaded CSV and score every row.
    pub fn predict_from_tabular_blob(&self, upload: &TabularUpload) -> Result<TabularPrediction> {
        let model = self.snapshot()?;

        if !tabular::is_tabular(upload.filename.as_deref(), upload.content_type.as_deref()) {
            let declared = upload
                .filename
                .as_deref()
                .or(upload.content_type.as_deref())
                .unwrap_or("upload without filename or content type");
            return Err(ServiceError::NotATable(declared.to_string()));
        }

        let records = tabular::parse_records(&upload.bytes)?;
        debug!(
            rows = records.len(),
            filename = upload.filename.as_deref().unwrap_or("-"),
            "Parsed tabular upload"
        );
        self.check_size(records.len())?;

        Ok(TabularPrediction {
            predictions: score(&model, &records)?,
            filename: upload.filename.clone(),
        })
    }

    fn snapshot(&self) -> Result<ModelRef> {
        self.store.current().ok_or(ServiceError::ModelUnavailable)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let limit = self.limits.max_batch_size;
        if size > limit {
            warn!(size, limit, "Rejecting oversized request");
            return Err(ServiceError::BatchTooLarge { size, limit });
        }
        Ok(())
    }
}

fn score(model: &ModelRef, records: &[FeatureRecord]) -> Result<Vec<PredictionResult>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let batch: Vec<FeatureVector> = records.iter().map(FeatureVector::from).collect();
    let classifier = model.classifier();
    let labels = classifier.predict_labels(&batch)?;
    let proba = classifier.predict_proba(&batch)?;

    if labels.len() != batch.len() || proba.len() != batch.len() {
        return Err(ServiceError::PredictionFailed(format!(
            "model returned {} labels and {} probabilities for {} records",
            labels.len(),
            proba.len(),
            batch.len()
        )));
    }

    records
        .iter()
        .zip(labels)
        .zip(proba)
        .enumerate()
        .map(|(row, ((record, prediction), [p0, p1]))| {
            let probability = p0.max(p1);
            if !(0.0..=1.0).contains(&probability) {
                return Err(ServiceError::PredictionFailed(format!(
                    "record {row}: class probabilities [{p0}, {p1}] are out of range"
                )));
            }
            Ok(PredictionResult {
                prediction,
                probability,
                kepid: record.kepid,
            })
        })
        .collect()
}
