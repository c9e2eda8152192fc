use crate::protocol::ClientMessage;
use crate::transport::{FrameReader, FrameWriter, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[allow(missing_debug_implementations)]
pub struct PushClient {
    reader: PushReader,
    writer: PushWriter,
}

#[allow(missing_debug_implementations)]
pub struct PushReader {
    stream: SplitStream<WsStream>,
}

#[allow(missing_debug_implementations)]
pub struct PushWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

impl PushClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        let (sink, stream) = stream.split();
        debug!(url, "push channel opened");

        Ok(Self {
            reader: PushReader { stream },
            writer: PushWriter { sink },
        })
    }

    pub fn into_split(self) -> (PushReader, PushWriter) {
        (self.reader, self.writer)
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.writer.send(message).await
    }

    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        self.reader.recv_text().await
    }
}

impl PushReader {
    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        next_text(&mut self.stream).await
    }
}

impl PushWriter {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let encoded = serde_json::to_string(message).context("failed to encode client message")?;
        self.sink
            .send(WsMessage::Text(encoded))
            .await
            .context("failed to write client message")
    }

    pub async fn close(&mut self) {
        if let Err(error) = self.sink.close().await {
            debug!(error = %error, "push channel close failed");
        }
    }
}

/// Read frames until the next non-empty text payload.
///
/// Control frames are skipped; a close frame or end of stream yields `None`.
pub(crate) async fn next_text<S>(stream: &mut S) -> Result<Option<String>>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let frame = match stream.next().await {
            None => return Ok(None),
            Some(frame) => frame.context("failed to read push frame")?,
        };

        match frame {
            WsMessage::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                return Ok(Some(text));
            }
            WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => return Ok(Some(text)),
                Err(_) => warn!("skipping non-utf8 binary push frame"),
            },
            WsMessage::Close(_) => return Ok(None),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

/// Opens WebSocket links to a fixed push URL.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
        let (reader, writer) = PushClient::connect(&self.url).await?.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[async_trait]
impl FrameReader for PushReader {
    async fn recv_text(&mut self) -> Result<Option<String>> {
        PushReader::recv_text(self).await
    }
}

#[async_trait]
impl FrameWriter for PushWriter {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        PushWriter::send(self, message).await
    }

    async fn close(&mut self) {
        PushWriter::close(self).await;
    }
}
