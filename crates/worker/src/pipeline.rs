use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use serde::Deserialize;
use crate::cache::{self, CacheStore, FsCache};
use crate::classifier::{classify, NormalizedResult};
use crate::config::WorkerConfig;
use crate::ffprobe::{FfprobeCommand, Prober};
use crate::projector::{project, DURATION_KEY};
use crate::store::{HttpMetadataStore, MetadataStore};

/// Existing-metadata key holding the media type
pub const FILE_TYPE_KEY: &str = "fileType";
pub const VIDEO_FILE_TYPE: &str = "video";

pub const NOT_A_VIDEO: &str = "Not a video file";
pub const ALREADY_PROCESSED: &str = "Already processed";

fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One unit of work: a single file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(default = "new_task_id")]
    pub task_id: String,
    pub file_id: String,
    /// Local path or remote URL handed to the prober as-is
    pub locator: String,
    /// Metadata the store already holds for the file
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// Terminal state of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    Skipped { reason: String },
    Failed { error: String },
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Skipped { .. } => "skipped",
            OutcomeStatus::Failed { .. } => "failed",
        }
    }

    fn skipped(reason: &str) -> Self {
        OutcomeStatus::Skipped { reason: reason.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub status: OutcomeStatus,
    /// Wall-clock time from task start to terminal state
    pub elapsed: Duration,
}

/// Metadata extraction pipeline
pub struct Pipeline {
    prober: Arc<dyn Prober>,
    store: Arc<dyn MetadataStore>,
    cache: Option<Arc<dyn CacheStore>>,
    hash_key: String,
}

impl Pipeline {
    pub fn new(
        prober: Arc<dyn Prober>,
        store: Arc<dyn MetadataStore>,
        cache: Option<Arc<dyn CacheStore>>,
        hash_key: impl Into<String>,
    ) -> Self {
        Self {
            prober,
            store,
            cache,
            hash_key: hash_key.into(),
        }
    }

    /// Wire the ffprobe adapter, HTTP store and filesystem cache from config
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        let cache = cfg
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(FsCache::new(dir.clone())) as Arc<dyn CacheStore>);
        Self::new(
            Arc::new(FfprobeCommand::from_config(cfg)),
            Arc::new(HttpMetadataStore::new(cfg.store_url.as_deref(), cfg.http_timeout())),
            cache,
            cfg.hash_key.clone(),
        )
    }

    /// Run one task to a terminal state
    pub async fn process(&self, request: &ProcessRequest) -> ProcessOutcome {
        let started = Instant::now();
        info!("Task {}: processing {} ({})", request.task_id, request.file_id, request.locator);

        let status = self.run(request).await;
        let outcome = ProcessOutcome {
            status,
            elapsed: started.elapsed(),
        };

        match &outcome.status {
            OutcomeStatus::Completed => {
                info!("✅ Task {}: completed in {:?}", request.task_id, outcome.elapsed);
            }
            OutcomeStatus::Skipped { reason } => {
                info!("⏭️  Task {}: skipped ({})", request.task_id, reason);
            }
            OutcomeStatus::Failed { error } => {
                error!("❌ Task {}: failed: {}", request.task_id, error);
            }
        }
        outcome
    }

    async fn run(&self, request: &ProcessRequest) -> OutcomeStatus {
        // Guard 1: only video files
        if request.metadata.get(FILE_TYPE_KEY).map(String::as_str) != Some(VIDEO_FILE_TYPE) {
            return OutcomeStatus::skipped(NOT_A_VIDEO);
        }

        // Guard 2: already carries probe output
        if request.metadata.contains_key(DURATION_KEY) {
            return OutcomeStatus::skipped(ALREADY_PROCESSED);
        }

        let hash = self.content_hash(request);

        // Guard 3: cached result for this content
        if let Some(cached) = self.read_cache(request, hash).await {
            info!("Task {}: cache hit, skipping ffprobe", request.task_id);
            return self.publish(request, &cached).await;
        }

        let raw = match self.prober.probe(&request.locator).await {
            Ok(raw) => raw,
            Err(e) => return OutcomeStatus::Failed { error: e.operator_message() },
        };
        debug!("Task {}: ffprobe completed, found {} streams", request.task_id, raw.streams.len());

        let result = classify(&raw);
        let status = self.publish(request, &result).await;
        if status == OutcomeStatus::Completed {
            self.write_cache(request, hash, &result).await;
        }
        status
    }

    fn content_hash<'a>(&self, request: &'a ProcessRequest) -> Option<&'a str> {
        let non_empty = |h: &&str| !h.is_empty();
        request
            .content_hash
            .as_deref()
            .filter(non_empty)
            .or_else(|| request.metadata.get(&self.hash_key).map(String::as_str).filter(non_empty))
    }

    /// Any cache problem reads as a miss
    async fn read_cache(&self, request: &ProcessRequest, hash: Option<&str>) -> Option<NormalizedResult> {
        let (cache_store, hash) = (self.cache.as_ref()?, hash?);

        let bytes = match cache_store.load(hash).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Task {}: {}", request.task_id, e);
                return None;
            }
        };

        match cache::decode(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Task {}: ignoring cache entry {}: {}", request.task_id, hash, e);
                None
            }
        }
    }

    async fn write_cache(&self, request: &ProcessRequest, hash: Option<&str>, result: &NormalizedResult) {
        let (Some(cache_store), Some(hash)) = (self.cache.as_ref(), hash) else {
            return;
        };
        let bytes = match cache::encode(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Task {}: failed to encode probe result for cache: {}", request.task_id, e);
                return;
            }
        };
        if let Err(e) = cache_store.store(hash, &bytes).await {
            warn!("Task {}: failed to cache probe result: {}", request.task_id, e);
        }
    }

    async fn publish(&self, request: &ProcessRequest, result: &NormalizedResult) -> OutcomeStatus {
        let map = project(result);
        match self.store.merge_metadata(&request.file_id, &map).await {
            Ok(()) => OutcomeStatus::Completed,
            Err(e) => OutcomeStatus::Failed { error: e.to_string() },
        }
    }
}
