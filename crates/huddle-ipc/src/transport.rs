//! Seam between the connection manager and the wire.
//!
//! The manager only needs "open a link, read text frames, write client
//! messages". `WsTransport` provides this over WebSocket; tests script it.

use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::ClientMessage;

/// Opens push-channel links.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one link, split into its read and write halves.
    async fn open(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)>;
}

/// Inbound half of a link.
#[async_trait]
pub trait FrameReader: Send {
    /// Next text frame, `None` once the peer closed the link.
    ///
    /// Must be cancel-safe: dropping the future never loses a frame.
    async fn recv_text(&mut self) -> Result<Option<String>>;
}

/// Outbound half of a link.
#[async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}
