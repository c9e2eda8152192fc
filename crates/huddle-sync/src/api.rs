use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use huddle_core::{
    BulkArchiveUpdate, BulkStatusUpdate, ComposeRequest, MailboxApi, ReparentRequest,
    RoutingUpdate, StatusUpdate, ThreadDetail,
};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `MailboxApi` over the server's JSON HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpMailboxApi {
    client: Client,
    base_url: String,
}

impl HttpMailboxApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "api url must start with http:// or https:// (got {base_url:?})"
        );

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create mailbox HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<()> {
        let endpoint = self.endpoint(path);
        debug!(endpoint = %endpoint, "mailbox request");

        let response = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .with_context(|| format!("failed to read response from {path}"))?;
        if let Err(error) = check_ack(status, &body_text) {
            warn!(endpoint = %endpoint, status = %status, "mailbox request rejected");
            return Err(error.context(format!("request to {path} rejected")));
        }
        Ok(())
    }
}

/// Interpret a mutation response.
///
/// Any non-2xx status fails. A 2xx body that is a JSON object with
/// `"success": false` (or an `"error"` string) also fails; every other
/// 2xx body counts as accepted.
pub fn check_ack(status: StatusCode, body: &str) -> Result<()> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let server_error = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    if !status.is_success() {
        match server_error {
            Some(error) => anyhow::bail!("server returned {status}: {error}"),
            None => anyhow::bail!("server returned {status}"),
        }
    }

    if let Some(value) = &parsed {
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            anyhow::bail!(
                "server reported failure: {}",
                server_error.as_deref().unwrap_or("no reason given")
            );
        }
        if let Some(error) = server_error {
            anyhow::bail!("server reported failure: {error}");
        }
    }
    Ok(())
}

#[async_trait]
impl MailboxApi for HttpMailboxApi {
    async fn set_status(&self, update: &StatusUpdate) -> Result<()> {
        self.post("/api/messages/status", update).await
    }

    async fn set_routing(&self, update: &RoutingUpdate) -> Result<()> {
        self.post("/api/messages/routing", update).await
    }

    async fn bulk_status(&self, update: &BulkStatusUpdate) -> Result<()> {
        self.post("/api/messages/bulk-status", update).await
    }

    async fn bulk_archive(&self, update: &BulkArchiveUpdate) -> Result<()> {
        self.post("/api/messages/bulk-archive", update).await
    }

    async fn reparent(&self, request: &ReparentRequest) -> Result<()> {
        self.post("/api/messages/thread", request).await
    }

    async fn send_message(&self, request: &ComposeRequest) -> Result<()> {
        self.post("/api/messages/send", request).await
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        let path = format!("/api/threads/{thread_id}");
        let response = self
            .client
            .get(self.endpoint(&path))
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("thread fetch for {thread_id} returned {status}");
        }
        response
            .json::<ThreadDetail>()
            .await
            .with_context(|| format!("invalid thread payload for {thread_id}"))
    }
}
