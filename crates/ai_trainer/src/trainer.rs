//! Tree-ensemble trainer
//!
//! Fits either a logistic gradient-boosted ensemble or a bagged random
//! forest over a dense, imputed feature matrix. Every random draw comes
//! from a seeded [`LcgRng`], so identical inputs give identical models.

use crate::cart::{BinnedMatrix, CartBuilder, TreeConfig};
use crate::deterministic::LcgRng;
use crate::errors::TrainerError;
use exovision_ai_core::gbdt::{EnsembleKind, TreeEnsemble};
use exovision_ai_core::{FEATURE_COLUMNS, FEATURE_COUNT};
use serde::Serialize;
use tracing::{debug, info};

/// Prior probabilities are kept away from 0 and 1 before taking log-odds.
const PRIOR_CLAMP: f64 = 1e-6;

/// Floor for logistic hessians.
const MIN_HESSIAN: f64 = 1e-16;

/// Ensemble training configuration
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingParams {
    pub kind: EnsembleKind,
    pub num_trees: usize,
    pub max_depth: usize,
    /// Shrinkage per boosting round, stored as the tree weight
    pub learning_rate: f64,
    /// Fraction of rows drawn per boosting round
    pub subsample: f64,
    pub min_samples_leaf: usize,
    /// L2 leaf regularisation (boosting only)
    pub lambda: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            kind: EnsembleKind::GradientBoosting,
            num_trees: 200,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            min_samples_leaf: 1,
            lambda: 1.0,
            max_bins: 64,
            seed: 42,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), TrainerError> {
        let invalid = |msg: &str| Err(TrainerError::Training(msg.to_string()));

        if self.num_trees == 0 {
            return invalid("num_trees must be at least 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid("learning_rate must be a positive number");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid("subsample must be in (0, 1]");
        }
        if self.min_samples_leaf == 0 {
            return invalid("min_samples_leaf must be at least 1");
        }
        if !(self.lambda >= 0.0 && self.lambda.is_finite()) {
            return invalid("lambda must be a non-negative number");
        }
        if self.max_bins < 2 {
            return invalid("max_bins must be at least 2");
        }
        Ok(())
    }
}

/// Share of total split gain attributed to one feature.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// A fitted ensemble and its feature importances (descending).
#[derive(Clone, Debug)]
pub struct TrainedModel {
    pub ensemble: TreeEnsemble,
    pub importance: Vec<FeatureImportance>,
}

pub struct Trainer {
    params: TrainingParams,
}

impl Trainer {
    pub fn new(params: TrainingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrainingParams {
        &self.params
    }

    /// Fit an ensemble on rows of contract-ordered features with 0/1 labels.
    pub fn train(
        &self,
        features: &[[f64; FEATURE_COUNT]],
        labels: &[u8],
    ) -> Result<TrainedModel, TrainerError> {
        self.params.validate()?;
        if features.is_empty() {
            return Err(TrainerError::Training("no training rows".into()));
        }
        if features.len() != labels.len() {
            return Err(TrainerError::Training(format!(
                "{} rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if let Some(row) = features.iter().position(|r| r.iter().any(|v| !v.is_finite())) {
            return Err(TrainerError::Training(format!(
                "row {row} has a non-finite feature; impute before training"
            )));
        }

        let matrix = BinnedMatrix::new(features, self.params.max_bins);
        info!(
            kind = self.params.kind.as_str(),
            rows = features.len(),
            trees = self.params.num_trees,
            "Starting training"
        );

        let (mut ensemble, gains) = match self.params.kind {
            EnsembleKind::GradientBoosting => self.boost(&matrix, features, labels)?,
            EnsembleKind::RandomForest => self.forest(&matrix, labels)?,
        };

        ensemble.metadata.insert(
            "trainer_version".into(),
            serde_json::Value::from(crate::VERSION),
        );
        ensemble
            .metadata
            .insert("params".into(), serde_json::to_value(&self.params)?);
        ensemble
            .metadata
            .insert("training_rows".into(), serde_json::Value::from(features.len()));
        ensemble.validate()?;

        Ok(TrainedModel {
            ensemble,
            importance: rank_importance(&gains),
        })
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            lambda: self.params.lambda,
            features_per_split: None,
        }
    }

    fn boost(
        &self,
        matrix: &BinnedMatrix,
        features: &[[f64; FEATURE_COUNT]],
        labels: &[u8],
    ) -> Result<(TreeEnsemble, [f64; FEATURE_COUNT]), TrainerError> {
        let n = labels.len();
        let targets: Vec<f64> = labels.iter().map(|&l| f64::from(l)).collect();
        let prior = (targets.iter().sum::<f64>() / n as f64).clamp(PRIOR_CLAMP, 1.0 - PRIOR_CLAMP);
        let base_score = (prior / (1.0 - prior)).ln();

        let mut rng = LcgRng::new(self.params.seed);
        let mut margins = vec![base_score; n];
        let mut gains = [0.0; FEATURE_COUNT];
        let mut trees = Vec::with_capacity(self.params.num_trees);

        for round in 0..self.params.num_trees {
            let (gradients, hessians) = logistic_gradients(&targets, &margins);
            let rows = self.subsample_rows(&mut rng, n);
            let tree_rng = LcgRng::new(rng.next_i64() as u64);

            let grown =
                CartBuilder::new(matrix, &gradients, &hessians, self.tree_config(), tree_rng)?
                    .build(&rows);
            let mut tree = grown.tree;
            tree.weight = self.params.learning_rate;

            for (margin, row) in margins.iter_mut().zip(features) {
                *margin += tree.weight * tree.evaluate(row).unwrap_or(0.0);
            }
            for (total, gain) in gains.iter_mut().zip(grown.gains) {
                *total += gain;
            }

            debug!(
                round = round + 1,
                nodes = tree.nodes.len(),
                rows = rows.len(),
                "Fitted boosting round"
            );
            trees.push(tree);
        }

        Ok((
            TreeEnsemble::new(EnsembleKind::GradientBoosting, trees, base_score),
            gains,
        ))
    }

    fn forest(
        &self,
        matrix: &BinnedMatrix,
        labels: &[u8],
    ) -> Result<(TreeEnsemble, [f64; FEATURE_COUNT]), TrainerError> {
        let n = labels.len();
        let gradients: Vec<f64> = labels.iter().map(|&l| -f64::from(l)).collect();
        let hessians = vec![1.0; n];
        let config = TreeConfig {
            lambda: 0.0,
            features_per_split: Some((FEATURE_COUNT as f64).sqrt().floor() as usize),
            ..self.tree_config()
        };

        let mut rng = LcgRng::new(self.params.seed);
        let mut gains = [0.0; FEATURE_COUNT];
        let mut trees = Vec::with_capacity(self.params.num_trees);

        for index in 0..self.params.num_trees {
            let rows: Vec<usize> = (0..n).map(|_| rng.next_index(n)).collect();
            let tree_rng = LcgRng::new(rng.next_i64() as u64);

            let grown = CartBuilder::new(matrix, &gradients, &hessians, config.clone(), tree_rng)?
                .build(&rows);
            for (total, gain) in gains.iter_mut().zip(grown.gains) {
                *total += gain;
            }

            debug!(tree = index + 1, nodes = grown.tree.nodes.len(), "Fitted forest tree");
            trees.push(grown.tree);
        }

        Ok((TreeEnsemble::new(EnsembleKind::RandomForest, trees, 0.0), gains))
    }

    fn subsample_rows(&self, rng: &mut LcgRng, n: usize) -> Vec<usize> {
        if self.params.subsample >= 1.0 {
            return (0..n).collect();
        }
        let rows: Vec<usize> = (0..n)
            .filter(|_| rng.next_unit() < self.params.subsample)
            .collect();
        if rows.is_empty() {
            (0..n).collect()
        } else {
            rows
        }
    }
}

/// Logistic-loss gradient `p - y` and hessian `p (1 - p)` per row.
fn logistic_gradients(targets: &[f64], margins: &[f64]) -> (Vec<f64>, Vec<f64>) {
    targets
        .iter()
        .zip(margins)
        .map(|(&y, &margin)| {
            let p = 1.0 / (1.0 + (-margin).exp());
            (p - y, (p * (1.0 - p)).max(MIN_HESSIAN))
        })
        .unzip()
}

/// Normalise gains to shares and sort descending, ties in contract order.
fn rank_importance(gains: &[f64; FEATURE_COUNT]) -> Vec<FeatureImportance> {
    let total: f64 = gains.iter().sum();
    let mut ranked: Vec<FeatureImportance> = FEATURE_COLUMNS
        .iter()
        .zip(gains)
        .map(|(name, &gain)| FeatureImportance {
            feature: name.to_string(),
            importance: if total > 0.0 { gain / total } else { 0.0 },
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}
