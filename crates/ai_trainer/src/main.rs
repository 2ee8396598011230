//! Exovision trainer CLI
//!
//! Trains the exoplanet classifier from a NASA KOI export and writes the
//! artifacts the serving node loads.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use exovision_ai_core::gbdt::EnsembleKind;
use exovision_ai_trainer::{
    train_on_dataset, write_artifacts, Dataset, Imputation, LabelSource, TrainingOptions,
    TrainingParams,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "exovision-train")]
#[command(author = "Exovision Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train the Exovision exoplanet classifier", long_about = None)]
struct Args {
    /// Input CSV (NASA cumulative KOI export; `#` comment lines allowed)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the model and its companions
    #[arg(short, long, default_value = "models")]
    output: PathBuf,

    /// Explicit 0/1 label column; defaults to koi_disposition == CONFIRMED
    #[arg(long)]
    label_col: Option<String>,

    /// Ensemble type
    #[arg(long, value_enum, default_value_t = KindArg::GradientBoosting)]
    kind: KindArg,

    /// Number of trees
    #[arg(long, default_value = "200")]
    trees: usize,

    /// Maximum tree depth
    #[arg(long, default_value = "6")]
    max_depth: usize,

    /// Boosting learning rate
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,

    /// Row fraction sampled per boosting round
    #[arg(long, default_value = "0.8")]
    subsample: f64,

    /// Minimum samples per leaf
    #[arg(long, default_value = "1")]
    min_samples_leaf: usize,

    /// L2 leaf regularisation
    #[arg(long, default_value = "1.0")]
    lambda: f64,

    /// Histogram bins per feature
    #[arg(long, default_value = "64")]
    max_bins: usize,

    /// Hold-out fraction for evaluation
    #[arg(long, default_value = "0.2")]
    test_fraction: f64,

    /// Random seed for deterministic sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Missing-value fill used for training
    #[arg(long, value_enum, default_value_t = ImputeArg::Median)]
    impute: ImputeArg,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    GradientBoosting,
    RandomForest,
}

impl From<KindArg> for EnsembleKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::GradientBoosting => EnsembleKind::GradientBoosting,
            KindArg::RandomForest => EnsembleKind::RandomForest,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ImputeArg {
    Median,
    Zero,
}

impl From<ImputeArg> for Imputation {
    fn from(impute: ImputeArg) -> Self {
        match impute {
            ImputeArg::Median => Imputation::Median,
            ImputeArg::Zero => Imputation::Zero,
        }
    }
}

impl Args {
    fn options(&self) -> TrainingOptions {
        TrainingOptions {
            label: self
                .label_col
                .clone()
                .map_or(LabelSource::Disposition, LabelSource::Column),
            imputation: self.impute.into(),
            test_fraction: self.test_fraction,
            params: TrainingParams {
                kind: self.kind.into(),
                num_trees: self.trees,
                max_depth: self.max_depth,
                learning_rate: self.learning_rate,
                subsample: self.subsample,
                min_samples_leaf: self.min_samples_leaf,
                lambda: self.lambda,
                max_bins: self.max_bins,
                seed: self.seed,
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Exovision Trainer v{}", env!("CARGO_PKG_VERSION"));

    info!("Loading dataset from: {}", args.input.display());
    let options = args.options();
    let dataset = Dataset::from_csv(&args.input, &options.label)
        .with_context(|| format!("Failed to load dataset {}", args.input.display()))?;

    info!("Feature statistics:");
    for stats in dataset.feature_stats() {
        match (stats.min, stats.max) {
            (Some(min), Some(max)) => info!(
                "  {:<14} min={:<12} max={:<12} missing={}",
                stats.name, min, max, stats.missing
            ),
            _ => info!("  {:<14} all values missing", stats.name),
        }
    }

    let params = &options.params;
    info!("Training configuration:");
    info!("  Kind: {}", params.kind.as_str());
    info!("  Trees: {}", params.num_trees);
    info!("  Max depth: {}", params.max_depth);
    info!("  Learning rate: {}", params.learning_rate);
    info!("  Subsample: {}", params.subsample);
    info!("  Min samples per leaf: {}", params.min_samples_leaf);
    info!("  Lambda: {}", params.lambda);
    info!("  Max bins: {}", params.max_bins);
    info!("  Seed: {}", params.seed);

    let outcome = train_on_dataset(&dataset, &options).context("Training failed")?;

    info!("Top features:");
    for feature in outcome.importance.iter().take(5) {
        info!("  {:<14} {:.4}", feature.feature, feature.importance);
    }

    let written = write_artifacts(&args.output, &outcome)
        .with_context(|| format!("Failed to write artifacts to {}", args.output.display()))?;

    info!("Training completed successfully");
    info!("  Model: {}", written.model.display());
    info!("  Hash: {} ({})", written.hash.display(), written.hash_hex);
    if let Some(metrics) = &written.metrics {
        info!("  Metrics: {}", metrics.display());
    }

    Ok(())
}
