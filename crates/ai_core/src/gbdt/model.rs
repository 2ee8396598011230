//! Tree-ensemble classifier artifact
//!
//! One JSON document describes either a boosted ensemble (logistic link over
//! summed leaf margins) or a bagged forest (mean of per-leaf class-1
//! fractions). Both are validated against the feature contract before they
//! can be served.

use super::tree::Tree;
use crate::classifier::{Classifier, Label};
use crate::errors::InferenceError;
use crate::features::{FeatureVector, FEATURE_COLUMNS, FEATURE_CONTRACT_VERSION, FEATURE_COUNT};
use crate::serialization::{artifact_hash_hex, canonical_json_string};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tree-ensemble errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Artifact layout version understood by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// How tree outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleKind {
    /// `sigmoid(base_score + Σ weight · leaf)`
    GradientBoosting,
    /// `mean(leaf)`, each leaf being a class-1 fraction
    RandomForest,
}

impl EnsembleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnsembleKind::GradientBoosting => "gradient_boosting",
            EnsembleKind::RandomForest => "random_forest",
        }
    }
}

/// Serialized tree-ensemble classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeEnsemble {
    pub format_version: u32,
    pub kind: EnsembleKind,

    /// Feature contract the ensemble was trained against
    pub contract_version: u32,
    pub feature_names: Vec<String>,

    /// Initial margin for boosted ensembles (log-odds); unused by forests
    #[serde(default)]
    pub base_score: f64,

    pub trees: Vec<Tree>,

    /// Free-form training provenance
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TreeEnsemble {
    /// Create an ensemble bound to the current feature contract
    pub fn new(kind: EnsembleKind, trees: Vec<Tree>, base_score: f64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            kind,
            contract_version: FEATURE_CONTRACT_VERSION,
            feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            base_score,
            trees,
            metadata: BTreeMap::new(),
        }
    }

    /// Validate structure and contract compatibility
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ModelError::ValidationFailed(format!(
                "Unsupported format version: {}",
                self.format_version
            )));
        }

        if self.contract_version != FEATURE_CONTRACT_VERSION {
            return Err(ModelError::ValidationFailed(format!(
                "Artifact targets feature contract v{}, serving expects v{}",
                self.contract_version, FEATURE_CONTRACT_VERSION
            )));
        }

        if self.feature_names.iter().map(String::as_str).ne(FEATURE_COLUMNS) {
            return Err(ModelError::ValidationFailed(format!(
                "Artifact feature order [{}] does not match serving order [{}]",
                self.feature_names.join(", "),
                FEATURE_COLUMNS.join(", ")
            )));
        }

        if self.trees.is_empty() {
            return Err(ModelError::ValidationFailed("Ensemble has no trees".into()));
        }

        if !self.base_score.is_finite() {
            return Err(ModelError::ValidationFailed(format!(
                "Invalid base_score: {}",
                self.base_score
            )));
        }

        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate().map_err(|e| {
                ModelError::ValidationFailed(format!("Tree {} validation failed: {}", i, e))
            })?;

            if let Some(max) = tree.max_feature_index() {
                if max >= FEATURE_COUNT {
                    return Err(ModelError::ValidationFailed(format!(
                        "Tree {} splits on feature {} but the contract has {}",
                        i, max, FEATURE_COUNT
                    )));
                }
            }

            if self.kind == EnsembleKind::RandomForest {
                let out_of_range = tree
                    .nodes
                    .iter()
                    .filter_map(|node| node.leaf)
                    .any(|value| !(0.0..=1.0).contains(&value));
                if out_of_range {
                    return Err(ModelError::ValidationFailed(format!(
                        "Tree {} has a forest leaf outside [0, 1]",
                        i
                    )));
                }
            }
        }

        Ok(())
    }

    /// Raw ensemble output before the link function.
    pub fn margin(&self, features: &[f64]) -> Result<f64, InferenceError> {
        let mut sum = 0.0;
        for (i, tree) in self.trees.iter().enumerate() {
            let value = tree
                .evaluate(features)
                .ok_or_else(|| InferenceError::MalformedTree {
                    tree: i,
                    reason: "traversal did not reach a leaf".into(),
                })?;
            sum += tree.weight * value;
        }

        Ok(match self.kind {
            EnsembleKind::GradientBoosting => self.base_score + sum,
            EnsembleKind::RandomForest => sum / self.trees.len() as f64,
        })
    }

    /// Probability of class 1.
    pub fn positive_probability(&self, features: &[f64]) -> Result<f64, InferenceError> {
        let margin = self.margin(features)?;
        let p = match self.kind {
            EnsembleKind::GradientBoosting => sigmoid(margin),
            EnsembleKind::RandomForest => margin.clamp(0.0, 1.0),
        };
        if p.is_finite() {
            Ok(p)
        } else {
            Err(InferenceError::NonFiniteScore)
        }
    }

    /// Serialize to canonical JSON
    pub fn to_canonical_json(&self) -> Result<String, ModelError> {
        Ok(canonical_json_string(self)?)
    }

    /// blake3 hash of the canonical JSON representation
    pub fn hash_hex(&self) -> Result<String, ModelError> {
        Ok(artifact_hash_hex(self.to_canonical_json()?.as_bytes()))
    }

    /// Save as canonical JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        fs::write(path, self.to_canonical_json()?)?;
        Ok(())
    }

    /// Decode and validate
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let model: TreeEnsemble = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    /// Load from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        Self::from_slice(&fs::read(path)?)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Classifier for TreeEnsemble {
    fn model_type(&self) -> &str {
        self.kind.as_str()
    }

    fn feature_count(&self) -> Option<usize> {
        Some(self.feature_names.len())
    }

    fn predict_labels(&self, batch: &[FeatureVector]) -> Result<Vec<Label>, InferenceError> {
        batch
            .iter()
            .map(|row| {
                self.positive_probability(row.as_slice())
                    .map(Label::from_positive_probability)
            })
            .collect()
    }

    fn predict_proba(&self, batch: &[FeatureVector]) -> Result<Vec<[f64; 2]>, InferenceError> {
        batch
            .iter()
            .map(|row| {
                self.positive_probability(row.as_slice())
                    .map(|p| [1.0 - p, p])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::tree::Node;

    fn boosted() -> TreeEnsemble {
        let tree1 = Tree::new(
            vec![
                Node::internal(0, 0, 10.0, 1, 2),
                Node::leaf(1, -1.0),
                Node::leaf(2, 1.0),
            ],
            1.0,
        );
        let tree2 = Tree::new(
            vec![
                Node::internal(0, 1, 100.0, 1, 2),
                Node::leaf(1, -0.5),
                Node::leaf(2, 0.5),
            ],
            0.5,
        );
        TreeEnsemble::new(EnsembleKind::GradientBoosting, vec![tree1, tree2], 0.25)
    }

    fn forest() -> TreeEnsemble {
        let tree1 = Tree::new(
            vec![
                Node::internal(0, 0, 10.0, 1, 2),
                Node::leaf(1, 0.2),
                Node::leaf(2, 0.9),
            ],
            1.0,
        );
        let tree2 = Tree::new(vec![Node::leaf(0, 0.6)], 1.0);
        TreeEnsemble::new(EnsembleKind::RandomForest, vec![tree1, tree2], 0.0)
    }

    fn row(first: f64, second: f64) -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        values[0] = first;
        values[1] = second;
        FeatureVector::new(values)
    }

    #[test]
    fn test_boosted_margin() {
        let model = boosted();
        assert!(model.validate().is_ok());
        // 0.25 + 1.0 * 1.0 + 0.5 * 0.5
        assert!((model.margin(row(20.0, 200.0).as_slice()).unwrap() - 1.5).abs() < 1e-12);
        // 0.25 - 1.0 - 0.25
        assert!((model.margin(row(5.0, 50.0).as_slice()).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_boosted_probabilities_sum_to_one() {
        let model = boosted();
        let proba = model.predict_proba(&[row(20.0, 200.0), row(5.0, 50.0)]).unwrap();
        for [p0, p1] in proba {
            assert!((p0 + p1 - 1.0).abs() < 1e-12);
        }
        let labels = model.predict_labels(&[row(20.0, 200.0), row(5.0, 50.0)]).unwrap();
        assert_eq!(labels, vec![Label::Candidate, Label::FalsePositive]);
    }

    #[test]
    fn test_forest_averages_leaves() {
        let model = forest();
        assert!(model.validate().is_ok());
        let p = model.positive_probability(row(20.0, 0.0).as_slice()).unwrap();
        assert!((p - 0.75).abs() < 1e-12);
        let p = model.positive_probability(row(1.0, 0.0).as_slice()).unwrap();
        assert!((p - 0.4).abs() < 1e-12);
        assert_eq!(model.model_type(), "random_forest");
    }

    #[test]
    fn test_forest_leaf_range_enforced() {
        let mut model = forest();
        model.trees[1] = Tree::new(vec![Node::leaf(0, 1.5)], 1.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_contract_mismatch_rejected() {
        let mut reordered = boosted();
        reordered.feature_names.swap(0, 1);
        assert!(reordered.validate().is_err());

        let mut newer = boosted();
        newer.contract_version = FEATURE_CONTRACT_VERSION + 1;
        assert!(newer.validate().is_err());

        let mut wide = boosted();
        wide.trees[0].nodes[0].feature_idx = FEATURE_COUNT as i32;
        assert!(wide.validate().is_err());
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        let model = TreeEnsemble::new(EnsembleKind::GradientBoosting, vec![], 0.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_save_load_json() {
        use tempfile::NamedTempFile;

        let model = boosted();
        let file = NamedTempFile::new().unwrap();
        model.save_json(file.path()).unwrap();

        let loaded = TreeEnsemble::load_json(file.path()).unwrap();
        assert_eq!(model, loaded);
        assert_eq!(model.hash_hex().unwrap(), loaded.hash_hex().unwrap());
    }

    #[test]
    fn test_hash_changes_with_model() {
        let a = boosted();
        let mut b = boosted();
        b.base_score = 0.3;
        assert_ne!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
    }
}
