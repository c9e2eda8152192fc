//! Fake implementations for testing.
#![allow(clippy::unwrap_used)]

use crate::traits::MailboxApi;
use crate::types::{
    BulkArchiveUpdate, BulkStatusUpdate, ComposeRequest, ReparentRequest, RoutingUpdate,
    StatusUpdate, ThreadDetail,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// One recorded request against `FakeMailboxApi`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    SetStatus(StatusUpdate),
    SetRouting(RoutingUpdate),
    BulkStatus(BulkStatusUpdate),
    BulkArchive(BulkArchiveUpdate),
    Reparent(ReparentRequest),
    Send(ComposeRequest),
    FetchThread(String),
}

/// Mailbox API that records every call and fails on demand.
#[derive(Debug, Default)]
pub struct FakeMailboxApi {
    calls: Mutex<Vec<ApiCall>>,
    failing: Mutex<bool>,
    threads: Mutex<HashMap<String, ThreadDetail>>,
}

impl FakeMailboxApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake whose every call fails.
    pub fn failing() -> Self {
        let api = Self::default();
        api.set_failing(true);
        api
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn insert_thread(&self, detail: ThreadDetail) {
        self.threads
            .lock()
            .unwrap()
            .insert(detail.thread_id.clone(), detail);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ApiCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.failing.lock().unwrap() {
            anyhow::bail!("fake mailbox api: request rejected");
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxApi for FakeMailboxApi {
    async fn set_status(&self, update: &StatusUpdate) -> Result<()> {
        self.record(ApiCall::SetStatus(update.clone()))
    }

    async fn set_routing(&self, update: &RoutingUpdate) -> Result<()> {
        self.record(ApiCall::SetRouting(update.clone()))
    }

    async fn bulk_status(&self, update: &BulkStatusUpdate) -> Result<()> {
        self.record(ApiCall::BulkStatus(update.clone()))
    }

    async fn bulk_archive(&self, update: &BulkArchiveUpdate) -> Result<()> {
        self.record(ApiCall::BulkArchive(update.clone()))
    }

    async fn reparent(&self, request: &ReparentRequest) -> Result<()> {
        self.record(ApiCall::Reparent(request.clone()))
    }

    async fn send_message(&self, request: &ComposeRequest) -> Result<()> {
        self.record(ApiCall::Send(request.clone()))
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        self.record(ApiCall::FetchThread(thread_id.to_owned()))?;
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("thread not found: {thread_id}"))
    }
}
