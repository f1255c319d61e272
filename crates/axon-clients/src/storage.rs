//! Object storage adapter. `local` mode writes under a root directory,
//! `http` mode PUTs to `{base_url}/{key}` with retry and exponential
//! backoff (three attempts, 200 ms base).

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use axon_core::config::{StorageConfig, StorageMode};

use crate::error::{ClientError, Result};

const BACKOFF_BASE_MS: u64 = 200;

pub struct StorageClient {
    client: reqwest::Client,
    mode: StorageMode,
    base_url: Option<String>,
    local_root: String,
    public_base_url: Option<String>,
    attempts: u32,
}

impl StorageClient {
    pub fn new(cfg: &StorageConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.upload_timeout_secs),
            mode: cfg.mode,
            base_url: cfg.base_url.as_ref().map(|u| u.trim_end_matches('/').to_string()),
            local_root: cfg.local_root.clone(),
            public_base_url: cfg
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            attempts: cfg.upload_attempts.max(1),
        }
    }

    /// Store `bytes` under `key` and return the public URL.
    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        match self.mode {
            StorageMode::Local => self.put_local(key, &bytes).await,
            StorageMode::Http => self.put_http(key, bytes, content_type).await,
        }
    }

    /// Convenience for large artefacts already on disk.
    pub async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ClientError::Parse(format!("read {}: {e}", path.display())))?;
        self.put(key, bytes, content_type).await
    }

    async fn put_local(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let dest = Path::new(&self.local_root).join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::Parse(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&dest, bytes)
            .await
            .map_err(|e| ClientError::Parse(format!("write {}: {e}", dest.display())))?;
        info!(key, size = bytes.len(), "artefact stored locally");
        Ok(self.public_url(key))
    }

    async fn put_http(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| ClientError::Parse("storage.base_url not configured".to_string()))?;
        let url = format!("{base}/{key}");

        let mut last_err = None;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                tokio::time::sleep(backoff).await;
            }
            let result = self
                .client
                .put(&url)
                .header("content-type", content_type)
                .body(bytes.clone())
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(key, attempt, "artefact uploaded");
                    return Ok(self.public_url(key));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    warn!(key, status, attempt, "upload rejected");
                    last_err = Some(ClientError::Api {
                        status,
                        message: resp.text().await.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    warn!(key, attempt, err = %e, "upload transport error");
                    last_err = Some(ClientError::Http(e));
                }
            }
        }
        Err(last_err.unwrap_or(ClientError::Timeout { ms: 0 }))
    }

    fn public_url(&self, key: &str) -> String {
        match (&self.public_base_url, &self.base_url, self.mode) {
            (Some(public), _, _) => format!("{public}/{key}"),
            (None, Some(base), StorageMode::Http) => format!("{base}/{key}"),
            _ => format!("{}/{key}", self.local_root.trim_end_matches('/')),
        }
    }
}

/// Object key layout for render artefacts:
/// `videos/{video_id}/{script_id}/{job_id}/{file}`.
pub fn render_asset_key(video_id: &str, script_id: &str, job_id: &str, file: &str) -> String {
    format!("videos/{video_id}/{script_id}/{job_id}/{file}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_key_layout() {
        assert_eq!(
            render_asset_key("v1", "s1", "j1", "video.mp4"),
            "videos/v1/s1/j1/video.mp4"
        );
    }

    #[tokio::test]
    async fn local_put_writes_and_returns_url() {
        let dir = std::env::temp_dir().join(format!("axon-storage-test-{}", uuid::Uuid::new_v4()));
        let cfg = StorageConfig {
            mode: StorageMode::Local,
            base_url: None,
            local_root: dir.to_string_lossy().into_owned(),
            public_base_url: Some("https://cdn.example.com".into()),
            upload_timeout_secs: 5,
            upload_attempts: 1,
        };
        let storage = StorageClient::new(&cfg);
        let url = storage
            .put("videos/v/s/j/video.mp4", b"data".to_vec(), "video/mp4")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/videos/v/s/j/video.mp4");
        let written = tokio::fs::read(dir.join("videos/v/s/j/video.mp4")).await.unwrap();
        assert_eq!(written, b"data");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
