//! Serving core for the Exovision exoplanet classifier
//!
//! Turns Kepler Object of Interest measurements into a candidate /
//! false-positive label with a confidence score.
//!
//! Modules:
//! - `features`: Frozen feature contract and the zero-fill projector
//! - `classifier`: The two-operation interface a trained model exposes
//! - `gbdt`: JSON tree-ensemble artifacts (boosted or bagged)
//! - `loader`: Pluggable artifact decoders
//! - `store`: Process-wide active model with atomic swap on reload
//! - `service`: Single, batch and file prediction
//! - `tabular`: CSV upload parsing
//! - `serialization`: Canonical JSON and artifact hashing
//! - `errors`: Load, inference and service error types

pub mod classifier;
pub mod errors;
pub mod features;
pub mod gbdt;
pub mod loader;
pub mod serialization;
pub mod service;
pub mod store;
pub mod tabular;

pub use classifier::{Classifier, Label};
pub use errors::{InferenceError, LoadError, ServiceError, TabularError};
pub use features::{
    project, CatalogId, FeatureRecord, FeatureVector, FEATURE_COLUMNS, FEATURE_CONTRACT_VERSION,
    FEATURE_COUNT,
};
pub use gbdt::{EnsembleKind, Node, Tree, TreeEnsemble};
pub use loader::{ModelLoader, TreeEnsembleLoader};
pub use service::{
    PredictionResult, PredictionService, ServiceLimits, TabularPrediction, TabularUpload,
    MAX_BATCH_SIZE,
};
pub use store::{LoadedModel, ModelRef, ModelStore};

/// Crate version string for metadata endpoints
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
