//! HTTP contract tests driven through the router without a socket

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use exovision_ai_core::{
    Classifier, FeatureVector, InferenceError, Label, LoadedModel, ModelStore, PredictionService,
    ServiceLimits,
};
use exovision_rpc::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const FULL_PROBABILITY: f64 = 0.7772998611746911;
const BOUNDARY: &str = "exovision-test-boundary";

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../ai_core/tests/fixtures/reference_model.json")
}

fn state_for(store: ModelStore) -> AppState {
    AppState::new(PredictionService::new(
        Arc::new(store),
        ServiceLimits::default(),
    ))
}

fn loaded_state() -> Result<AppState> {
    let store = ModelStore::with_tree_ensemble(fixture_path());
    store.reload()?;
    Ok(state_for(store))
}

fn router(state: AppState) -> Router {
    build_router(Arc::new(state))
}

fn reference_record() -> Value {
    json!({
        "kepid": 10797460,
        "koi_period": 9.48803557,
        "koi_depth": 615.8,
        "koi_duration": 2.9575,
        "koi_impact": 0.146,
        "koi_model_snr": 35.8,
        "koi_steff": 5455.0,
        "koi_slogg": 4.467,
        "koi_srad": 0.927,
        "koi_kepmag": 15.347,
        "ra": 291.93423,
        "dec": 48.141651
    })
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, body))
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body)?))?)
}

fn post_raw(uri: &str, content_type: &str, body: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_owned()))?)
}

fn post_upload(field: &str, filename: &str, content: &str) -> Result<Request<Body>> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    );
    Ok(Request::builder()
        .method("POST")
        .uri("/predict/file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))?)
}

#[derive(Debug)]
struct SlowClassifier(Duration);

impl Classifier for SlowClassifier {
    fn model_type(&self) -> &str {
        "slow"
    }

    fn feature_count(&self) -> Option<usize> {
        None
    }

    fn predict_labels(&self, batch: &[FeatureVector]) -> Result<Vec<Label>, InferenceError> {
        std::thread::sleep(self.0);
        Ok(vec![Label::FalsePositive; batch.len()])
    }

    fn predict_proba(&self, batch: &[FeatureVector]) -> Result<Vec<[f64; 2]>, InferenceError> {
        Ok(vec![[1.0, 0.0]; batch.len()])
    }
}

#[tokio::test]
async fn test_unloaded_service_degrades() -> Result<()> {
    let state = state_for(ModelStore::with_tree_ensemble("models/absent.json"));

    let (status, health) = send(router(state.clone()), get("/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["model_loaded"], false);

    let (status, info) = send(router(state.clone()), get("/model/info")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["is_loaded"], false);
    assert_eq!(info["model_type"], "Unknown");
    assert_eq!(info["model_path"], "models/absent.json");
    assert_eq!(info["feature_names"].as_array().map(Vec::len), Some(11));

    let (status, body) = send(
        router(state.clone()),
        post_json("/predict", &reference_record())?,
    )
    .await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Model not loaded");

    let (status, body) = send(
        router(state),
        post_upload("file", "koi.csv", "koi_period\n1.0")?,
    )
    .await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Model not loaded");
    Ok(())
}

#[tokio::test]
async fn test_single_prediction() -> Result<()> {
    let (status, body) = send(
        router(loaded_state()?),
        post_json("/predict", &reference_record())?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["kepid"], 10797460);
    let probability = body["probability"].as_f64().unwrap_or_default();
    assert!((probability - FULL_PROBABILITY).abs() < 1e-12);
    Ok(())
}

#[tokio::test]
async fn test_empty_record_is_scored() -> Result<()> {
    let (status, body) = send(router(loaded_state()?), post_json("/predict", &json!({}))?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kepid"], Value::Null);
    assert!(body["probability"].as_f64().is_some_and(|p| (0.5..=1.0).contains(&p)));
    Ok(())
}

#[tokio::test]
async fn test_kepid_accepts_integral_float() -> Result<()> {
    let record = json!({"kepid": 10797460.0, "koi_period": 9.5});
    let (status, body) = send(router(loaded_state()?), post_json("/predict", &record)?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kepid"], 10797460);

    let record = json!({"kepid": 10797460.5});
    let (status, body) = send(router(loaded_state()?), post_json("/predict", &record)?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("kepid")));
    Ok(())
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() -> Result<()> {
    let state = loaded_state()?;

    let (status, body) = send(
        router(state.clone()),
        post_raw("/predict", "application/json", "{not json")?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        router(state.clone()),
        post_json("/predict", &json!({"koi_period": "abc"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("koi_period")));

    let (status, body) = send(
        router(state.clone()),
        post_raw("/predict/batch", "text/plain", "[]")?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body["error"].is_string());

    let (status, body) = send(
        router(state),
        post_raw("/predict/file", "text/csv", "koi_period\n1.0\n")?,
    )
    .await?;
    assert!(status.is_client_error());
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_batch_prediction_keeps_order() -> Result<()> {
    let batch = json!([
        reference_record(),
        {"kepid": 2, "koi_period": 15.5, "koi_depth": 0.005},
    ]);
    let (status, body) = send(router(loaded_state()?), post_json("/predict/batch", &batch)?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_samples"], 2);
    assert_eq!(body["predictions"][0]["kepid"], 10797460);
    assert_eq!(body["predictions"][1]["kepid"], 2);
    Ok(())
}

#[tokio::test]
async fn test_batch_size_limit() -> Result<()> {
    let state = loaded_state()?;

    let at_limit = Value::Array(vec![json!({"koi_period": 1.0}); 1000]);
    let (status, body) = send(
        router(state.clone()),
        post_json("/predict/batch", &at_limit)?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_samples"], 1000);

    let over_limit = Value::Array(vec![json!({"koi_period": 1.0}); 1001]);
    let (status, body) = send(router(state), post_json("/predict/batch", &over_limit)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Batch size too large (1001 > max 1000)");
    Ok(())
}

#[tokio::test]
async fn test_file_prediction() -> Result<()> {
    let csv = "# exported from the archive\n\
               kepid,koi_period,koi_depth,koi_disposition\n\
               10797460,9.48803557,615.8,CONFIRMED\n\
               10811496,19.899140,,FALSE POSITIVE\n";
    let (status, body) = send(
        router(loaded_state()?),
        post_upload("file", "cumulative.csv", csv)?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_samples"], 2);
    assert_eq!(body["filename"], "cumulative.csv");
    assert_eq!(body["predictions"][1]["kepid"], 10811496);
    Ok(())
}

#[tokio::test]
async fn test_file_rejections() -> Result<()> {
    let state = loaded_state()?;

    let (status, body) = send(
        router(state.clone()),
        post_upload("file", "notes.txt", "koi_period\n1.0")?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("notes.txt")));

    let (status, _) = send(
        router(state.clone()),
        post_upload("file", "ragged.csv", "koi_period,koi_depth\n1.0\n")?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        router(state),
        post_upload("attachment", "koi.csv", "koi_period\n1.0")?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("`file`")));
    Ok(())
}

#[tokio::test]
async fn test_reload_lifecycle() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("baseline.json");
    let state = state_for(ModelStore::with_tree_ensemble(&path));

    let reload = || -> Result<Request<Body>> {
        Ok(Request::builder()
            .method("POST")
            .uri("/model/reload")
            .body(Body::empty())?)
    };

    let (status, body) = send(router(state.clone()), reload()?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some_and(|e| e.starts_with("Failed to reload model")));

    fs::copy(fixture_path(), &path)?;
    let (status, body) = send(router(state.clone()), reload()?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Model reloaded successfully");

    let (_, info) = send(router(state.clone()), get("/model/info")?).await?;
    assert_eq!(info["is_loaded"], true);
    assert_eq!(info["model_type"], "gradient_boosting");
    assert_eq!(info["feature_count"], 11);
    assert_eq!(info["feature_contract_version"], 1);
    assert!(info["artifact_hash"].as_str().is_some_and(|h| h.len() == 64));

    // A broken artifact leaves the previous model serving.
    fs::write(&path, b"{ not json")?;
    let (status, _) = send(router(state.clone()), reload()?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, _) = send(router(state), post_json("/predict", &reference_record())?).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_inference_timeout() -> Result<()> {
    let store = ModelStore::with_tree_ensemble("unused.json");
    store.install(LoadedModel::from_classifier(
        Arc::new(SlowClassifier(Duration::from_millis(500))),
        "slow.json",
    ));
    let mut state = state_for(store);
    state.inference_timeout = Duration::from_millis(20);

    let (status, body) = send(router(state), post_json("/predict", &reference_record())?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body["error"],
        "Prediction failed: inference timed out after 20 ms"
    );
    Ok(())
}

#[tokio::test]
async fn test_body_limit() -> Result<()> {
    let mut state = loaded_state()?;
    state.max_upload_bytes = 256;

    let batch = Value::Array(vec![reference_record(); 10]);
    let (status, body) = send(router(state), post_json("/predict/batch", &batch)?).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_root_and_metrics() -> Result<()> {
    let state = loaded_state()?;

    let (status, banner) = send(router(state.clone()), get("/")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(banner["message"], "Exoplanet Classification API");

    let response = router(state).oneshot(get("/metrics")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );
    let text = String::from_utf8(response.into_body().collect().await?.to_bytes().to_vec())?;
    assert!(text.contains("exovision_http_requests_total 2"));
    assert!(text.contains("exovision_model_loaded 1"));
    Ok(())
}
