use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use exovision_ai_core::{
    FeatureRecord, LoadError, PredictionResult, PredictionService, ServiceError, TabularUpload,
    FEATURE_COLUMNS, FEATURE_CONTRACT_VERSION,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Upper bound on a single inference call.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body cap, 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field carrying the CSV upload.
pub const UPLOAD_FIELD: &str = "file";

const ROUTES: [&str; 8] = [
    "GET /",
    "GET /health",
    "GET /model/info",
    "POST /predict",
    "POST /predict/batch",
    "POST /predict/file",
    "POST /model/reload",
    "GET /metrics",
];

#[derive(Clone)]
pub struct AppState {
    pub service: PredictionService,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Installed recorder; `None` when Prometheus export is disabled
    pub prometheus: Option<PrometheusHandle>,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(service: PredictionService) -> Self {
        Self {
            service,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            prometheus: None,
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn model_loaded(&self) -> bool {
        self.service.store().is_loaded()
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    docs: [&'static str; 8],
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    uptime_secs: u64,
    req_total: u64,
}

#[derive(Debug, Serialize)]
struct ModelInfoResponse {
    model_path: String,
    model_type: String,
    is_loaded: bool,
    feature_count: Option<usize>,
    artifact_hash: Option<String>,
    feature_contract_version: u32,
    feature_names: Vec<&'static str>,
    loaded_at: Option<DateTime<Utc>>,
    contract_drift: Option<Vec<String>>,
    scaler_present: bool,
}

#[derive(Debug, Serialize)]
struct BatchPredictionResponse {
    predictions: Vec<PredictionResult>,
    total_samples: usize,
}

#[derive(Debug, Serialize)]
struct FilePredictionResponse {
    predictions: Vec<PredictionResult>,
    total_samples: usize,
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::BatchTooLarge { .. }
            | ServiceError::InvalidFormat(_)
            | ServiceError::NotATable(_) => StatusCode::BAD_REQUEST,
            ServiceError::PredictionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        Self::internal(format!("Failed to reload model: {err}"))
    }
}

fn error_kind(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::ModelUnavailable => "model_unavailable",
        ServiceError::BatchTooLarge { .. } => "batch_too_large",
        ServiceError::InvalidFormat(_) => "invalid_format",
        ServiceError::NotATable(_) => "not_a_table",
        ServiceError::PredictionFailed(_) => "prediction_failed",
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    if let Ok(local) = listener.local_addr() {
        info!("HTTP API listening on {local}");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(err) => warn!("Failed to listen for shutdown signal: {err}"),
    }
}

pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/model/info", get(handle_model_info))
        .route("/model/reload", post(handle_reload))
        .route("/predict", post(handle_predict))
        .route("/predict/batch", post(handle_predict_batch))
        .route("/predict/file", post(handle_predict_file))
        .route("/metrics", get(handle_metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Score on the blocking pool, bounded by the configured timeout.
///
/// On expiry the blocking task is left to finish on its own; its result is
/// discarded.
async fn run_inference<T, F>(
    state: &AppState,
    endpoint: &'static str,
    job: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PredictionService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = state.service.clone();
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || job(&service));

    let outcome = match tokio::time::timeout(state.inference_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ServiceError::PredictionFailed(format!(
            "inference task failed: {join_err}"
        ))),
        Err(_) => Err(ServiceError::PredictionFailed(format!(
            "inference timed out after {} ms",
            state.inference_timeout.as_millis()
        ))),
    };

    let elapsed = started.elapsed();
    metrics::histogram!("exovision_inference_seconds", "endpoint" => endpoint)
        .record(elapsed.as_secs_f64());
    debug!(endpoint, elapsed_ms = elapsed.as_millis() as u64, "Inference finished");

    outcome.map_err(|err| {
        metrics::counter!("exovision_prediction_errors_total", "kind" => error_kind(&err))
            .increment(1);
        warn!(endpoint, "Prediction request failed: {err}");
        ApiError::from(err)
    })
}

fn count_predictions(endpoint: &'static str, count: usize) {
    metrics::counter!("exovision_predictions_total", "endpoint" => endpoint)
        .increment(count as u64);
}

async fn handle_root(State(state): State<SharedState>) -> Json<RootResponse> {
    state.record_request();
    Json(RootResponse {
        message: "Exoplanet Classification API",
        version: env!("CARGO_PKG_VERSION"),
        docs: ROUTES,
    })
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.model_loaded(),
        uptime_secs: state.uptime_seconds(),
        req_total,
    })
}

async fn handle_model_info(State(state): State<SharedState>) -> Json<ModelInfoResponse> {
    state.record_request();
    let store = state.service.store();

    let response = match store.current() {
        Some(model) => ModelInfoResponse {
            model_path: model.path().display().to_string(),
            model_type: model.classifier().model_type().to_string(),
            is_loaded: true,
            feature_count: model.classifier().feature_count(),
            artifact_hash: Some(model.artifact_hash().to_string()).filter(|hash| !hash.is_empty()),
            feature_contract_version: FEATURE_CONTRACT_VERSION,
            feature_names: FEATURE_COLUMNS.to_vec(),
            loaded_at: Some(model.loaded_at()),
            contract_drift: model.contract_drift().map(<[String]>::to_vec),
            scaler_present: model.scaler_present(),
        },
        None => ModelInfoResponse {
            model_path: store.path().display().to_string(),
            model_type: "Unknown".to_string(),
            is_loaded: false,
            feature_count: None,
            artifact_hash: None,
            feature_contract_version: FEATURE_CONTRACT_VERSION,
            feature_names: FEATURE_COLUMNS.to_vec(),
            loaded_at: None,
            contract_drift: None,
            scaler_present: false,
        },
    };

    Json(response)
}

async fn handle_predict(
    State(state): State<SharedState>,
    record: Result<Json<FeatureRecord>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    state.record_request();
    let Json(record) = record?;
    let result =
        run_inference(&state, "single", move |service| service.predict_one(&record)).await?;
    count_predictions("single", 1);
    Ok(Json(result))
}

async fn handle_predict_batch(
    State(state): State<SharedState>,
    records: Result<Json<Vec<FeatureRecord>>, JsonRejection>,
) -> Result<Json<BatchPredictionResponse>, ApiError> {
    state.record_request();
    let Json(records) = records?;
    let predictions =
        run_inference(&state, "batch", move |service| service.predict_batch(&records)).await?;
    count_predictions("batch", predictions.len());

    Ok(Json(BatchPredictionResponse {
        total_samples: predictions.len(),
        predictions,
    }))
}

async fn handle_predict_file(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FilePredictionResponse>, ApiError> {
    state.record_request();
    let mut multipart = multipart?;
    let upload = read_upload(&mut multipart).await?;
    let scored = run_inference(&state, "file", move |service| {
        service.predict_from_tabular_blob(&upload)
    })
    .await?;
    count_predictions("file", scored.predictions.len());

    Ok(Json(FilePredictionResponse {
        total_samples: scored.predictions.len(),
        predictions: scored.predictions,
        filename: scored.filename,
    }))
}

async fn read_upload(multipart: &mut Multipart) -> Result<TabularUpload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(err.status(), err.body_text()))?;
        info!(
            "Received upload {} ({} bytes)",
            filename.as_deref().unwrap_or("<unnamed>"),
            bytes.len()
        );

        return Ok(TabularUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(ApiError::bad_request(format!(
        "multipart field `{UPLOAD_FIELD}` is required"
    )))
}

async fn handle_reload(State(state): State<SharedState>) -> Result<Json<ReloadResponse>, ApiError> {
    state.record_request();
    let store = Arc::clone(state.service.store());
    tokio::task::spawn_blocking(move || store.reload())
        .await
        .map_err(|err| ApiError::internal(format!("reload task failed: {err}")))??;

    Ok(Json(ReloadResponse {
        message: "Model reloaded successfully",
    }))
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let req_total = state.record_request();
    let uptime = state.uptime_seconds();
    let model_loaded = u8::from(state.model_loaded());

    let mut metrics =
        "# HELP exovision_http_requests_total Total number of HTTP requests handled\n".to_string();
    metrics.push_str("# TYPE exovision_http_requests_total counter\n");
    metrics.push_str(&format!("exovision_http_requests_total {req_total}\n"));
    metrics.push_str("# HELP exovision_uptime_seconds Uptime of the service in seconds\n");
    metrics.push_str("# TYPE exovision_uptime_seconds gauge\n");
    metrics.push_str(&format!("exovision_uptime_seconds {uptime}\n"));
    metrics.push_str("# HELP exovision_model_loaded Whether a model is currently served\n");
    metrics.push_str("# TYPE exovision_model_loaded gauge\n");
    metrics.push_str(&format!("exovision_model_loaded {model_loaded}\n"));

    if let Some(handle) = &state.prometheus {
        metrics.push_str(&handle.render());
    }

    let mut response = Response::new(Body::from(metrics));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}
