//! Contract between the sync layer and the mailbox server's request API.
//!
//! Every call is fire-and-confirm: `Ok(())` means the server accepted the
//! mutation, any `Err` means it did not (or we cannot tell). Callers decide
//! how to converge; implementations never touch local state.

use crate::types::{
    BulkArchiveUpdate, BulkStatusUpdate, ComposeRequest, ReparentRequest, RoutingUpdate,
    StatusUpdate, ThreadDetail,
};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Set one message's workflow status.
    async fn set_status(&self, update: &StatusUpdate) -> Result<()>;

    /// Change a message's sender or recipient.
    async fn set_routing(&self, update: &RoutingUpdate) -> Result<()>;

    async fn bulk_status(&self, update: &BulkStatusUpdate) -> Result<()>;

    async fn bulk_archive(&self, update: &BulkArchiveUpdate) -> Result<()>;

    /// Attach a message under another thread.
    async fn reparent(&self, request: &ReparentRequest) -> Result<()>;

    /// Send now, or schedule, a new message.
    async fn send_message(&self, request: &ComposeRequest) -> Result<()>;

    /// Read-only fetch of a single thread.
    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadDetail>;
}
