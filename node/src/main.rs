use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use exovision_ai_core::{ModelStore, PredictionService, ServiceLimits};
use exovision_rpc::{start_server, AppState};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::AppConfig;

fn cli() -> Command {
    Command::new("exovision-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exovision exoplanet classification server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Override HTTP bind host"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port"),
        )
        .arg(
            Arg::new("model-path")
                .short('m')
                .long("model-path")
                .value_name("FILE")
                .help("Override the model artifact path"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Do not install the Prometheus recorder"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Validate configuration and load the model, then exit"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }

    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }

    if let Some(model_path) = matches.get_one::<String>("model-path") {
        config.model_path = PathBuf::from(model_path);
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    init_logging(&config)?;
    info!("Exovision node v{}", env!("CARGO_PKG_VERSION"));
    match &config.config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file found; using defaults and environment"),
    }

    let store = Arc::new(ModelStore::with_tree_ensemble(config.model_path.clone()));

    if matches.get_flag("check") {
        return run_checks(&config, &store);
    }

    let prometheus = init_metrics(&config);
    load_initial_model(&store);

    let service = PredictionService::new(
        store,
        ServiceLimits {
            max_batch_size: config.max_batch_size,
        },
    );
    let state = AppState {
        service,
        inference_timeout: Duration::from_millis(config.inference_timeout_ms),
        max_upload_bytes: config.max_upload_bytes,
        prometheus,
        start_time: Instant::now(),
        req_count: Arc::new(AtomicUsize::new(0)),
    };

    info!(
        "Starting HTTP API on {} (max batch {}, inference timeout {} ms)",
        config.bind_address(),
        config.max_batch_size,
        config.inference_timeout_ms
    );
    start_server(state, &config.bind_address()).await
}

/// A missing or broken artifact does not stop the server; prediction
/// endpoints answer 503 until a reload succeeds.
fn load_initial_model(store: &ModelStore) {
    match store.reload() {
        Ok(model) => info!(
            "Serving {} model from {}",
            model.classifier().model_type(),
            model.path().display()
        ),
        Err(err) => warn!(
            "Starting without a model ({err}); POST /model/reload once the artifact is in place"
        ),
    }
}

fn run_checks(config: &AppConfig, store: &ModelStore) -> Result<()> {
    let model = store
        .reload()
        .with_context(|| format!("model check failed for {}", config.model_path.display()))?;

    println!("configuration: ok ({})", config.bind_address());
    println!(
        "model: ok ({}, {} features, blake3 {})",
        model.classifier().model_type(),
        model
            .classifier()
            .feature_count()
            .map_or_else(|| "unknown".to_string(), |count| count.to_string()),
        model.artifact_hash()
    );
    if let Some(columns) = model.contract_drift() {
        println!(
            "warning: feature_names.txt lists {} columns that differ from the serving contract",
            columns.len()
        );
    }
    if model.scaler_present() {
        println!("warning: a scaler artifact sits next to the model and is not applied");
    }
    Ok(())
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(
                "exovision_predictions_total",
                "Records scored, by endpoint"
            );
            describe_counter!(
                "exovision_prediction_errors_total",
                "Failed prediction requests, by error kind"
            );
            describe_counter!(
                "exovision_model_loads_total",
                "Model load attempts, by outcome"
            );
            describe_histogram!(
                "exovision_inference_seconds",
                "Wall time of one inference call, by endpoint"
            );
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialise logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialise logging")?;
    }

    Ok(())
}
