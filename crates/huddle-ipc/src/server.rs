//! Minimal push-channel server.
//!
//! Speaks the same envelope protocol as the mailbox server, enough to drive
//! the client end-to-end in tests.

use crate::client::next_text;
use crate::protocol::{ClientMessage, ServerMessage};
use anyhow::{Context, Result};
use futures::SinkExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::debug;

#[allow(missing_debug_implementations)]
pub struct PushServer {
    local_addr: SocketAddr,
    listener: TcpListener,
}

impl PushServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind push server")?;
        let local_addr = listener
            .local_addr()
            .context("failed to read push server address")?;

        Ok(Self {
            local_addr,
            listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub async fn accept(&self) -> Result<PushConnection> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .context("failed to accept push connection")?;
        let stream = accept_async(stream)
            .await
            .context("websocket handshake failed")?;
        debug!(peer = %peer, "push client connected");
        Ok(PushConnection { stream })
    }
}

#[allow(missing_debug_implementations)]
pub struct PushConnection {
    stream: WebSocketStream<TcpStream>,
}

impl PushConnection {
    /// Next client message, `None` once the client went away.
    pub async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        let Some(text) = next_text(&mut self.stream).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .context("failed to decode client message")
    }

    pub async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        self.send_raw(message.encode()?).await
    }

    /// Send a frame verbatim, including malformed ones.
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<()> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .context("failed to write server message")
    }

    pub async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            debug!(error = %error, "push connection close failed");
        }
    }
}
