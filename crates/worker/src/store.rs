use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use crate::error::PublishError;
use crate::projector::FlatMetadataMap;

/// Write-only sink for extracted metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Merge `map` into the metadata already stored for `file_id`
    async fn merge_metadata(&self, file_id: &str, map: &FlatMetadataMap) -> Result<(), PublishError>;
}

/// Metadata store reached over HTTP
pub struct HttpMetadataStore {
    client: Client,
    base_url: Option<String>,
}

impl HttpMetadataStore {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    fn merge_url(&self, file_id: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/files/{}/metadata", base, file_id))
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn merge_metadata(&self, file_id: &str, map: &FlatMetadataMap) -> Result<(), PublishError> {
        let url = self.merge_url(file_id).ok_or(PublishError::NotConfigured)?;
        debug!("Merging {} metadata keys into {}", map.len(), url);

        let response = self.client.patch(&url).json(map).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected { status, body });
        }

        Ok(())
    }
}
