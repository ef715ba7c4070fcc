use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The remote side of progress sync. `StreamingClient` talks HTTP; tests plug in recorders.
#[async_trait]
pub trait RemoteProgressStore: Send + Sync {
    async fn update_progress(&self, content_id: &str, progress: f64) -> anyhow::Result<()>;
    async fn list_content(&self) -> anyhow::Result<Vec<StreamingContent>>;
}

#[derive(Clone, Debug)]
pub struct StreamingClient {
    base_url: String,
    client: reqwest::Client,
}

impl StreamingClient {
    /// Create a new client with the given base URL (e.g. "http://localhost:3001").
    ///
    /// `timeout` bounds each request from connect to the end of the body.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url_str = base_url.into();
        reqwest::Url::parse(&base_url_str)
            .with_context(|| format!("Invalid streaming API URL: {}", base_url_str))?;
        tracing::debug!(base_url = %base_url_str, ?timeout, "creating StreamingClient");
        Ok(StreamingClient {
            base_url: base_url_str.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// `/api/streaming/{content_id}/{rest..}` with the id escaped as a single path segment.
    fn content_url(&self, content_id: &str, rest: &[&str]) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid streaming API URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("streaming API URL cannot take a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["api", "streaming", content_id])
            .extend(rest);
        Ok(url)
    }

    /// GET /api/streaming
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_content(&self) -> anyhow::Result<Vec<StreamingContent>> {
        let url = self.url("/api/streaming");
        tracing::debug!(%url, "GET catalog");
        let resp = self.client.get(&url).send().await?;
        let body = read_success_body(resp).await?;
        match serde_json::from_str::<Vec<StreamingContent>>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                let snippet_len = body.len().min(2000);
                let snippet = body.get(..snippet_len).unwrap_or(&body);
                tracing::error!(error = %e, body_snippet = %snippet, "failed to parse catalog");
                Err(e.into())
            }
        }
    }

    /// PATCH /api/streaming/:id/progress (no auth required)
    ///
    /// The endpoint rejects unknown properties, so the body carries `watchProgress` only.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn patch_progress(
        &self,
        content_id: &str,
        progress: f64,
    ) -> anyhow::Result<StreamingContent> {
        let url = self.content_url(content_id, &["progress"])?;
        tracing::debug!(%url, progress, "PATCH progress");
        let resp = self
            .client
            .patch(url)
            .json(&ProgressUpdateRequest {
                watch_progress: progress,
            })
            .send()
            .await?;
        let body = read_success_body(resp).await?;
        let parsed: StreamingContent = serde_json::from_str(&body)?;
        Ok(parsed)
    }
}

#[async_trait]
impl RemoteProgressStore for StreamingClient {
    async fn update_progress(&self, content_id: &str, progress: f64) -> anyhow::Result<()> {
        let updated = self.patch_progress(content_id, progress).await?;
        tracing::debug!(
            content_id,
            confirmed = updated.watch_progress,
            "server accepted progress"
        );
        Ok(())
    }

    async fn list_content(&self) -> anyhow::Result<Vec<StreamingContent>> {
        StreamingClient::list_content(self).await
    }
}

/// Returns the body of a 2xx response; anything else becomes an error naming the status and body.
async fn read_success_body(resp: reqwest::Response) -> anyhow::Result<String> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let snippet_len = body.len().min(500);
        let snippet = body.get(..snippet_len).unwrap_or(&body);
        anyhow::bail!("streaming API returned {}: {}", status, snippet);
    }
    Ok(body)
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRequest {
    pub watch_progress: f64,
}

/// The catalog fields this agent reads. The server sends more; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingContent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub watch_progress: f64,
    pub updated_at: Option<DateTime<Utc>>,
}
