use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::{ChannelEvent, ClientMessage, RealtimeInput, ServerMessage, Setup};
use crate::audio::MediaBlob;

/// Outbound frames queued before the socket pushes back
const OUTBOUND_CAPACITY: usize = 16;

/// Time the writer gets to flush a close frame before it is aborted
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to open one session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub api_key: String,
    pub setup: Setup,
}

/// Opens session channels
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<LiveConnection>;
}

/// One open duplex session
///
/// Audio goes out through `outbound`; everything the remote side says
/// arrives on `events`.
pub struct LiveConnection {
    pub outbound: mpsc::Sender<MediaBlob>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Connection backed by plain channels, with no socket tasks
    pub fn new(outbound: mpsc::Sender<MediaBlob>, events: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            outbound,
            events,
            writer: None,
            reader: None,
        }
    }

    /// Split into the parts the session loop uses separately
    pub fn into_parts(self) -> (mpsc::Sender<MediaBlob>, mpsc::UnboundedReceiver<ChannelEvent>, ConnectionHandle) {
        (
            self.outbound,
            self.events,
            ConnectionHandle {
                writer: self.writer,
                reader: self.reader,
            },
        )
    }
}

/// Owns the socket tasks of a connection
pub struct ConnectionHandle {
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Stop the socket tasks
    ///
    /// All outbound senders must be dropped first so the writer can send its
    /// close frame.
    pub async fn close(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                debug!("Writer did not finish closing in time, aborting");
                writer.abort();
            }
        }
    }
}

/// Connector for the Live API WebSocket endpoint
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<LiveConnection> {
        info!("Connecting to Live API at {} (model={})", self.endpoint, request.setup.model);

        let url = format!("{}?key={}", self.endpoint, request.api_key);
        let (socket, _response) = connect_async(url)
            .await
            .context("Failed to connect to Live API")?;

        let (mut sink, mut stream) = socket.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(request.setup))
            .context("Failed to encode setup message")?;
        sink.send(Message::Text(setup))
            .await
            .context("Failed to send setup message")?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<MediaBlob>(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            let mut frames = 0u64;

            while let Some(blob) = outbound_rx.recv().await {
                let payload = match encode_realtime_input(blob) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode audio frame: {}", e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(payload)).await {
                    error!("Failed to send audio frame: {}", e);
                    let _ = writer_events.send(ChannelEvent::Error(e.to_string()));
                    return;
                }

                frames += 1;
                if frames % 100 == 0 {
                    debug!("Sent {} audio frames", frames);
                }
            }

            debug!("Outbound queue closed after {} frames, closing socket", frames);
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("Failed to send close frame: {}", e);
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .filter(|r| !r.trim().is_empty());
                        info!("Live API closed the session: {}", reason.as_deref().unwrap_or("no reason"));
                        let _ = events_tx.send(ChannelEvent::Closed(reason));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Live API stream error: {}", e);
                        let _ = events_tx.send(ChannelEvent::Error(e.to_string()));
                        return;
                    }
                };

                match parse_server_frame(&payload) {
                    Ok(Some(event)) => {
                        if events_tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to parse server message: {}", e),
                }
            }

            let _ = events_tx.send(ChannelEvent::Closed(None));
        });

        info!("Live API connection established, waiting for setup acknowledgement");

        Ok(LiveConnection {
            outbound: outbound_tx,
            events: events_rx,
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

/// Encode one audio frame as a `realtimeInput` message
pub fn encode_realtime_input(blob: MediaBlob) -> Result<String> {
    let message = ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![blob],
    });
    Ok(serde_json::to_string(&message)?)
}

/// Translate one server frame into a channel event
///
/// Returns `None` for messages the session does not act on.
pub fn parse_server_frame(payload: &[u8]) -> Result<Option<ChannelEvent>> {
    let message: ServerMessage = serde_json::from_slice(payload).context("Invalid server message")?;

    if message.setup_complete.is_some() {
        return Ok(Some(ChannelEvent::Opened));
    }

    if let Some(content) = message.server_content {
        return Ok(Some(ChannelEvent::Message(content.into())));
    }

    if let Some(go_away) = message.go_away {
        warn!(
            "Live API will close the session soon (time left: {})",
            go_away.time_left.as_deref().unwrap_or("unknown")
        );
    }

    Ok(None)
}
