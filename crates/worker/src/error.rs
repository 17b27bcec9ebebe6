use thiserror::Error;

/// Failure of the external probing tool
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch ffprobe for {locator}: {source}")]
    Spawn {
        locator: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ffprobe timed out after {secs}s for {locator}")]
    Timeout { locator: String, secs: u64 },
    #[error("ffprobe failed (exit code {code}) for {locator}: {stderr}")]
    ExitStatus {
        locator: String,
        code: i32,
        stderr: String,
    },
    #[error("failed to parse ffprobe output for {locator}: {reason}")]
    Parse { locator: String, reason: String },
}

impl ProbeError {
    /// Message surfaced to the orchestrator, with a hint for the operator
    pub fn operator_message(&self) -> String {
        format!(
            "{}. Make sure ffprobe is installed and `ffprobe_bin` points at it",
            self
        )
    }
}

/// A cached record that could not be decoded
#[derive(Debug, Error)]
#[error("corrupt cache entry: {0}")]
pub struct CacheCorruptError(pub String);

/// I/O failure against the cache location
#[derive(Debug, Error)]
#[error("cache storage error for {key}: {source}")]
pub struct CacheStoreError {
    pub key: String,
    #[source]
    pub source: std::io::Error,
}

/// Failure to merge metadata into the store
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("metadata store URL is not configured")]
    NotConfigured,
    #[error("metadata store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("metadata store rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },
}
