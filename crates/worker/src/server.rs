use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::config::{ConfigurePatch, WorkerConfig};
use crate::notify::{CallbackNotifier, OutcomeReport};
use crate::pipeline::{Pipeline, ProcessRequest, FILE_TYPE_KEY};
use crate::projector::{DURATION_KEY, FORMAT_NAME_KEY, STREAM_KEY_PREFIX};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WORKER_NAME: &str = "metaprobe";

/// Shared state behind the router
pub struct AppState {
    config: RwLock<WorkerConfig>,
    pipeline: RwLock<Arc<Pipeline>>,
    notifier: CallbackNotifier,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: WorkerConfig) -> Self {
        let pipeline = Pipeline::from_config(&config);
        Self::with_pipeline(config, pipeline)
    }

    pub fn with_pipeline(config: WorkerConfig, pipeline: Pipeline) -> Self {
        Self {
            notifier: CallbackNotifier::new(config.http_timeout()),
            config: RwLock::new(config),
            pipeline: RwLock::new(Arc::new(pipeline)),
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> WorkerConfig {
        self.config.read().clone()
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline.read())
    }
}

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of `POST /process`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    #[serde(flatten)]
    pub request: ProcessRequest,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    requires: Vec<&'static str>,
    provides: Vec<String>,
}

/// Configuration as reported by `POST /configure`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView {
    listen_addr: String,
    ffprobe_bin: PathBuf,
    probe_timeout_secs: u64,
    cache_dir: Option<PathBuf>,
    store_url: Option<String>,
    callback_url: Option<String>,
    http_timeout_secs: u64,
    hash_key: String,
}

impl From<WorkerConfig> for ConfigView {
    fn from(config: WorkerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr,
            ffprobe_bin: config.ffprobe_bin,
            probe_timeout_secs: config.probe_timeout_secs,
            cache_dir: config.cache_dir,
            store_url: config.store_url,
            callback_url: config.callback_url,
            http_timeout_secs: config.http_timeout_secs,
            hash_key: config.hash_key,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/manifest", get(manifest))
        .route("/configure", post(configure))
        .route("/process", post(process))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config().listen_addr;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "startedAt": state.started_at.to_rfc3339(),
        "uptimeSecs": uptime,
    }))
}

async fn manifest() -> Json<Manifest> {
    Json(Manifest {
        name: WORKER_NAME,
        version: VERSION,
        description: "Extracts container and stream metadata from video files with ffprobe",
        requires: vec![FILE_TYPE_KEY],
        provides: vec![
            DURATION_KEY.to_string(),
            FORMAT_NAME_KEY.to_string(),
            format!("{}<n>", STREAM_KEY_PREFIX),
        ],
    })
}

async fn configure(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<ConfigurePatch>,
) -> Json<ConfigView> {
    let config = {
        let mut config = state.config.write();
        config.apply(patch);
        config.clone()
    };
    *state.pipeline.write() = Arc::new(Pipeline::from_config(&config));
    info!("Configuration updated: store={:?} callback={:?} cache={:?}",
          config.store_url, config.callback_url, config.cache_dir);
    Json(config.into())
}

async fn process(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessBody>,
) -> Result<impl IntoResponse, HttpError> {
    let ProcessBody { request, callback_url } = body;
    if request.file_id.trim().is_empty() {
        return Err(HttpError::BadRequest("fileId must not be empty".to_string()));
    }
    if request.locator.trim().is_empty() {
        return Err(HttpError::BadRequest("locator must not be empty".to_string()));
    }

    let task_id = request.task_id.clone();
    let callback_url = callback_url.or_else(|| state.config.read().callback_url.clone());
    let pipeline = state.pipeline();
    let notifier = state.notifier.clone();

    tokio::spawn(async move {
        let outcome = pipeline.process(&request).await;
        match callback_url {
            Some(url) => notifier.notify(url, OutcomeReport::new(&request.task_id, &outcome)),
            None => warn!("Task {}: no callback URL, outcome not reported", request.task_id),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "taskId": task_id, "status": "accepted" })),
    ))
}
