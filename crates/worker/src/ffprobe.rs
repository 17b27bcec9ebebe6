use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};
use tokio::process::Command;
use crate::config::WorkerConfig;
use crate::error::ProbeError;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    #[serde(default)]
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    #[serde(default, deserialize_with = "lenient_text")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub format_name: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub width: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub height: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub avg_frame_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub sample_rate: Option<String>,
    #[serde(default)]
    pub channel_layout: Option<String>,
    #[serde(default)]
    pub disposition: Option<HashMap<String, Option<i64>>>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

impl FFProbeData {
    /// Parse the JSON printed by `ffprobe -print_format json`
    pub fn from_json(bytes: &[u8], locator: &str) -> Result<Self, ProbeError> {
        serde_json::from_slice(bytes).map_err(|e| ProbeError::Parse {
            locator: locator.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FFProbeStream {
    /// A disposition flag, `None` when the block or the flag is missing
    pub fn disposition_flag(&self, name: &str) -> Option<bool> {
        self.disposition
            .as_ref()
            .and_then(|d| d.get(name).copied().flatten())
            .map(|v| v != 0)
    }

    /// A tag value by name
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .as_ref()
            .and_then(|t| t.get(name))
            .map(String::as_str)
    }
}

/// Accept either a JSON string or a JSON number as text
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(render_number(&n)),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Shortest decimal rendering: 2.0 becomes "2", 2.5 stays "2.5"
fn render_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Anything that can turn a file locator into a raw probe record
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, locator: &str) -> Result<FFProbeData, ProbeError>;
}

/// Runs the ffprobe binary as a child process
#[derive(Debug, Clone)]
pub struct FfprobeCommand {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl FfprobeCommand {
    pub fn new(bin: PathBuf, timeout: Option<Duration>) -> Self {
        Self { bin, timeout }
    }

    pub fn from_config(cfg: &WorkerConfig) -> Self {
        Self::new(cfg.ffprobe_bin.clone(), cfg.probe_timeout())
    }

    fn command(&self, locator: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(locator)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for FfprobeCommand {
    async fn probe(&self, locator: &str) -> Result<FFProbeData, ProbeError> {
        debug!("ffprobe command: {} -v error -print_format json -show_streams -show_format {}",
               self.bin.display(), locator);

        let run = self.command(locator).output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| ProbeError::Timeout {
                    locator: locator.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => run.await,
        }
        .map_err(|source| ProbeError::Spawn {
            locator: locator.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                locator: locator.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        FFProbeData::from_json(&output.stdout, locator)
    }
}
