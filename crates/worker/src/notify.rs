use std::time::Duration;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use crate::pipeline::{OutcomeStatus, ProcessOutcome};

/// Body posted to the orchestrator when a task reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub task_id: String,
    pub status: &'static str,
    /// Elapsed milliseconds
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeReport {
    pub fn new(task_id: &str, outcome: &ProcessOutcome) -> Self {
        let (reason, error) = match &outcome.status {
            OutcomeStatus::Completed => (None, None),
            OutcomeStatus::Skipped { reason } => (Some(reason.clone()), None),
            OutcomeStatus::Failed { error } => (None, Some(error.clone())),
        };
        Self {
            task_id: task_id.to_string(),
            status: outcome.status.label(),
            duration: outcome.elapsed.as_millis() as u64,
            reason,
            error,
        }
    }
}

/// Fire-and-forget delivery of outcome reports
#[derive(Clone)]
pub struct CallbackNotifier {
    client: Client,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });
        Self { client }
    }

    /// Post the report on a background task; failures are only logged
    pub fn notify(&self, url: String, report: OutcomeReport) {
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&report).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Task {}: callback delivered to {}", report.task_id, url);
                }
                Ok(resp) => {
                    warn!("Task {}: callback to {} returned {}", report.task_id, url, resp.status());
                }
                Err(e) => {
                    warn!("Task {}: callback to {} failed: {}", report.task_id, url, e);
                }
            }
        });
    }
}
