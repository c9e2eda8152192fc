//! Scripted transport for driving the connection manager in tests.
#![allow(clippy::unwrap_used)]

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{FrameReader, FrameWriter, Transport};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

enum Attempt {
    Accept(ScriptedReader, ScriptedWriter),
    Refuse(String),
}

/// Transport whose `open` calls follow a queued script.
///
/// Each `accept()` queues one successful link and hands back the server side
/// of it; each `refuse()` queues one failed attempt. Attempts beyond the end
/// of the script are refused.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    attempts: AtomicUsize,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &self.script.lock().unwrap().len())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&self) -> LinkHandle {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Attempt::Accept(
            ScriptedReader { frames: frames_rx },
            ScriptedWriter { sent: sent_tx },
        ));
        LinkHandle {
            frames: Some(frames_tx),
            sent: sent_rx,
        }
    }

    pub fn refuse(&self, reason: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Attempt::Refuse(reason.into()));
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Attempt::Accept(reader, writer)) => Ok((Box::new(reader), Box::new(writer))),
            Some(Attempt::Refuse(reason)) => anyhow::bail!(reason),
            None => anyhow::bail!("connection refused"),
        }
    }
}

/// Server side of a scripted link.
#[derive(Debug)]
pub struct LinkHandle {
    frames: Option<mpsc::UnboundedSender<String>>,
    sent: mpsc::UnboundedReceiver<ClientMessage>,
}

impl LinkHandle {
    pub fn push(&self, message: &ServerMessage) {
        self.push_raw(message.encode().unwrap());
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(text.into());
        }
    }

    /// Simulate the server closing the link.
    pub fn close(&mut self) {
        self.frames = None;
    }

    pub async fn next_sent(&mut self) -> Option<ClientMessage> {
        self.sent.recv().await
    }

    pub fn try_sent(&mut self) -> Option<ClientMessage> {
        self.sent.try_recv().ok()
    }
}

struct ScriptedReader {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn recv_text(&mut self) -> Result<Option<String>> {
        Ok(self.frames.recv().await)
    }
}

struct ScriptedWriter {
    sent: mpsc::UnboundedSender<ClientMessage>,
}

#[async_trait]
impl FrameWriter for ScriptedWriter {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.sent
            .send(message.clone())
            .map_err(|_closed| anyhow::anyhow!("scripted link closed"))
    }

    async fn close(&mut self) {}
}
