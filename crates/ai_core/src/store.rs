//! Process-wide holder of the active model
//!
//! Readers clone an `Arc` out of the cell and release the lock before
//! scoring, so a concurrent reload never changes the instance an in-flight
//! request is using. A failed load leaves the cell untouched.

use crate::classifier::Classifier;
use crate::errors::LoadError;
use crate::features::FEATURE_COLUMNS;
use crate::loader::{ModelLoader, TreeEnsembleLoader};
use crate::serialization::artifact_hash_hex;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Sibling file listing the columns a training run used.
pub const FEATURE_NAMES_FILE: &str = "feature_names.txt";

/// Sibling scaler artifacts. Never applied at serving time.
pub const SCALER_FILES: [&str; 2] = ["scaler.json", "scaler.pkl"];

/// A classifier together with where it came from.
#[derive(Debug)]
pub struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    path: PathBuf,
    artifact_hash: String,
    loaded_at: DateTime<Utc>,
    contract_drift: Option<Vec<String>>,
    scaler_present: bool,
}

/// Read-only handle to a loaded model.
pub type ModelRef = Arc<LoadedModel>;

impl LoadedModel {
    /// Wrap an in-memory classifier, bypassing the filesystem.
    pub fn from_classifier(classifier: Arc<dyn Classifier>, path: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            path: path.into(),
            artifact_hash: String::new(),
            loaded_at: Utc::now(),
            contract_drift: None,
            scaler_present: false,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifact_hash(&self) -> &str {
        &self.artifact_hash
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Column list from a sibling `feature_names.txt` that disagrees with
    /// the serving contract.
    pub fn contract_drift(&self) -> Option<&[String]> {
        self.contract_drift.as_deref()
    }

    pub fn scaler_present(&self) -> bool {
        self.scaler_present
    }
}

/// Owner of the single active model reference.
pub struct ModelStore {
    path: PathBuf,
    loader: Box<dyn ModelLoader>,
    active: RwLock<Option<ModelRef>>,
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("path", &self.path)
            .field("format", &self.loader.format())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelStore {
    /// Empty store bound to `path` for [`ModelStore::reload`].
    pub fn new(path: impl Into<PathBuf>, loader: impl ModelLoader + 'static) -> Self {
        Self {
            path: path.into(),
            loader: Box::new(loader),
            active: RwLock::new(None),
        }
    }

    /// Empty store reading JSON tree-ensemble artifacts.
    pub fn with_tree_ensemble(path: impl Into<PathBuf>) -> Self {
        Self::new(path, TreeEnsembleLoader)
    }

    /// Configured artifact path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the artifact at `path` and make it the active model.
    #[instrument(skip(self), fields(path = %path.display(), format = self.loader.format()))]
    pub fn load(&self, path: &Path) -> Result<ModelRef, LoadError> {
        match self.read_artifact(path) {
            Ok(model) => {
                info!(
                    model_type = model.classifier.model_type(),
                    hash = %model.artifact_hash,
                    "Model loaded successfully from {}",
                    path.display()
                );
                metrics::counter!("exovision_model_loads_total", "outcome" => "success")
                    .increment(1);
                Ok(self.install(model))
            }
            Err(err) => {
                error!("Error loading model: {}", err);
                metrics::counter!("exovision_model_loads_total", "outcome" => "failure")
                    .increment(1);
                if self.is_loaded() {
                    warn!("Keeping previously loaded model active");
                }
                Err(err)
            }
        }
    }

    /// Re-read the configured path.
    pub fn reload(&self) -> Result<ModelRef, LoadError> {
        let path = self.path.clone();
        self.load(&path)
    }

    /// Replace the active model.
    pub fn install(&self, model: LoadedModel) -> ModelRef {
        let model = Arc::new(model);
        *self.active.write() = Some(Arc::clone(&model));
        model
    }

    /// Currently active model, if any load has succeeded.
    pub fn current(&self) -> Option<ModelRef> {
        self.active.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.active.read().is_some()
    }

    fn read_artifact(&self, path: &Path) -> Result<LoadedModel, LoadError> {
        let bytes = fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::corrupt(path, format!("read failed: {err}")),
        })?;

        let classifier = self.loader.decode(path, &bytes)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        Ok(LoadedModel {
            classifier,
            path: path.to_path_buf(),
            artifact_hash: artifact_hash_hex(&bytes),
            loaded_at: Utc::now(),
            contract_drift: inspect_feature_names(dir),
            scaler_present: inspect_scaler(dir),
        })
    }
}

/// Compare a sibling `feature_names.txt` with the serving contract.
fn inspect_feature_names(dir: &Path) -> Option<Vec<String>> {
    let listing = dir.join(FEATURE_NAMES_FILE);
    let text = fs::read_to_string(&listing).ok()?;
    let names: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if names.iter().map(String::as_str).eq(FEATURE_COLUMNS) {
        return None;
    }

    warn!(
        listed = names.len(),
        expected = FEATURE_COLUMNS.len(),
        "{} disagrees with the serving feature contract; predictions use the contract order",
        listing.display()
    );
    Some(names)
}

fn inspect_scaler(dir: &Path) -> bool {
    match SCALER_FILES.iter().map(|name| dir.join(name)).find(|p| p.exists()) {
        Some(scaler) => {
            warn!(
                "Scaler artifact {} is present but not applied; inputs are served unscaled",
                scaler.display()
            );
            true
        }
        None => false,
    }
}
