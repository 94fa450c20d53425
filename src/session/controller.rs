use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::devices::DeviceProvider;
use super::state::{Effect, Event, SessionState, Snapshot};
use crate::audio::{encode_block, AudioBackend, AudioFrame, AudioOutput, MediaBlob, SourceId};
use crate::error::SessionError;
use crate::live::{ChannelEvent, ConnectRequest, ConnectionHandle, Connector, LiveConnection};

/// User-facing controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start if idle or errored, stop otherwise
    Toggle,
    Start,
    Stop,
    /// Tear down and end the event loop
    Shutdown,
}

/// Cloneable handle for front ends: send commands, watch snapshots
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl SessionHandle {
    /// Queue a command; fails once the session loop has exited
    pub async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Voice session is no longer running"))
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}

/// Resources held by one live session; all `None` when idle
#[derive(Default)]
struct Resources {
    session_id: Option<String>,
    capture: Option<Box<dyn AudioBackend>>,
    output: Option<Box<dyn AudioOutput>>,
    outbound: Option<mpsc::Sender<MediaBlob>>,
    connection: Option<ConnectionHandle>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    ended: Option<mpsc::UnboundedReceiver<SourceId>>,
    capture_task: Option<JoinHandle<()>>,
    /// Channel handshake still in flight
    pending_connect: Option<JoinHandle<anyhow::Result<LiveConnection>>>,
}

impl Resources {
    fn is_released(&self) -> bool {
        self.session_id.is_none()
            && self.capture.is_none()
            && self.output.is_none()
            && self.outbound.is_none()
            && self.connection.is_none()
            && self.events.is_none()
            && self.ended.is_none()
            && self.capture_task.is_none()
            && self.pending_connect.is_none()
    }
}

/// Input the event loop is waiting on
enum Input {
    Command(Option<Command>),
    Channel(ChannelEvent),
    Ended(Option<SourceId>),
    Connected(Result<anyhow::Result<LiveConnection>, JoinError>),
}

/// Voice session controller
///
/// Owns the session state and every session resource, and runs a single
/// event loop over user commands, channel events, playback completions and
/// the result of an in-flight handshake. State changes go through
/// `SessionState::apply`; this type only executes the returned effects.
/// Nothing the loop awaits depends on the network, so a stop is handled
/// even while the channel is still opening.
pub struct VoiceSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn DeviceProvider>,
    state: SessionState,
    resources: Resources,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
    frames_sent: Arc<AtomicU64>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn DeviceProvider>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let state = SessionState::new(config.output_sample_rate, config.credential_var.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());

        let session = Self {
            config,
            connector,
            devices,
            state,
            resources: Resources::default(),
            commands: commands_rx,
            snapshot_tx,
            frames_sent: Arc::new(AtomicU64::new(0)),
        };

        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };

        (session, handle)
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Voice session controller running");

        while self.step().await {}

        self.teardown().await;
        self.publish();
        info!("Voice session controller stopped");
    }

    /// Wait for one input and handle it. Returns false on shutdown.
    pub async fn step(&mut self) -> bool {
        let input = tokio::select! {
            command = self.commands.recv() => Input::Command(command),
            event = next_channel_event(&mut self.resources.events) => Input::Channel(event),
            id = next_ended(&mut self.resources.ended) => Input::Ended(id),
            result = next_connected(&mut self.resources.pending_connect) => Input::Connected(result),
        };

        match input {
            Input::Command(None) | Input::Command(Some(Command::Shutdown)) => {
                self.handle(Event::Stop).await;
                false
            }
            Input::Command(Some(command)) => {
                self.handle_command(command).await;
                true
            }
            Input::Channel(event) => {
                self.handle_channel_event(event).await;
                true
            }
            Input::Ended(Some(id)) => {
                self.handle(Event::PlaybackEnded(id)).await;
                true
            }
            Input::Ended(None) => {
                self.resources.ended = None;
                true
            }
            Input::Connected(result) => {
                self.resources.pending_connect = None;
                self.connected(result).await;
                true
            }
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        let has_credential = self.config.credential.is_some();
        let event = match command {
            Command::Toggle => Event::Toggle { has_credential },
            Command::Start => Event::Start { has_credential },
            Command::Stop | Command::Shutdown => Event::Stop,
        };
        self.handle(event).await;
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        let event = match event {
            ChannelEvent::Opened => Event::ChannelOpened,
            ChannelEvent::Message(message) => {
                let now = self
                    .resources
                    .output
                    .as_ref()
                    .map(|output| output.current_time())
                    .unwrap_or_default();
                Event::Message { message, now }
            }
            ChannelEvent::Error(detail) => {
                self.resources.events = None;
                Event::ChannelError(detail)
            }
            ChannelEvent::Closed(reason) => {
                self.resources.events = None;
                Event::ChannelClosed(reason)
            }
        };
        self.handle(event).await;
    }

    /// Feed an event through the state machine and run its effects
    ///
    /// The new state is published before any effect runs. Effects may
    /// produce follow-up events (a device that failed to open, a playback
    /// that could not be scheduled); those are processed in order before
    /// returning.
    pub async fn handle(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let effects = self.state.apply(event);
            self.publish();

            for effect in effects {
                if let Some(next) = self.run_effect(effect).await {
                    queue.push_back(next);
                }
            }
        }

        self.publish();
    }

    /// Current state as the front ends see it
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = self.state.snapshot();
        snapshot.stats.frames_sent = self.frames_sent.load(Ordering::SeqCst);
        snapshot
    }

    /// True when no device, channel or task is held
    pub fn is_released(&self) -> bool {
        self.resources.is_released()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Connect => self.connect().await,
            Effect::StartCapture => self.start_capture().await,
            Effect::Play { id, start_at, buffer } => {
                let Some(output) = self.resources.output.as_mut() else {
                    return Some(Event::PlaybackEnded(id));
                };
                match output.schedule(id, start_at, buffer) {
                    Ok(start) => Some(Event::PlaybackStarted { id, start }),
                    Err(e) => {
                        warn!("Failed to schedule playback {}: {:#}", id, e);
                        Some(Event::PlaybackEnded(id))
                    }
                }
            }
            Effect::StopPlayback => {
                if let Some(output) = self.resources.output.as_mut() {
                    let stopped = output.stop_all();
                    debug!("Silenced {} queued fragments", stopped);
                }
                None
            }
            Effect::Teardown => {
                self.teardown().await;
                None
            }
        }
    }

    /// Acquire microphone and output, then start opening the channel
    ///
    /// The handshake runs as its own task under the configured timeout; its
    /// result comes back through the event loop.
    async fn connect(&mut self) -> Option<Event> {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        info!("Starting voice session: {}", session_id);
        self.resources.session_id = Some(session_id);
        self.frames_sent.store(0, Ordering::SeqCst);

        let capture = match self.devices.open_input(self.config.backend_config()) {
            Ok(capture) => capture,
            Err(e) => return Some(Event::StartFailed(SessionError::Microphone(format!("{:#}", e)))),
        };
        info!("Capture device ready: {}", capture.name());
        self.resources.capture = Some(capture);

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output = match self.devices.open_output(self.config.output_sample_rate, ended_tx).await {
            Ok(output) => output,
            Err(e) => return Some(Event::StartFailed(SessionError::Speaker(format!("{:#}", e)))),
        };
        info!("Playback device ready: {}", output.name());
        self.resources.output = Some(output);
        self.resources.ended = Some(ended_rx);

        let Some(api_key) = self.config.credential.clone() else {
            return Some(Event::StartFailed(SessionError::MissingCredential(
                self.config.credential_var.clone(),
            )));
        };

        let request = ConnectRequest {
            api_key,
            setup: self.config.setup(),
        };

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        self.resources.pending_connect = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, connector.connect(request)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("No answer within {:?}", timeout)),
            }
        }));

        None
    }

    /// Take over the channel once the handshake task finishes
    async fn connected(&mut self, result: Result<anyhow::Result<LiveConnection>, JoinError>) {
        let outcome = result.unwrap_or_else(|e| Err(anyhow::anyhow!("Connect task failed: {}", e)));

        match outcome {
            Ok(connection) => {
                debug!("Channel connected, waiting for setup acknowledgement");
                let (outbound, events, handle) = connection.into_parts();
                self.resources.outbound = Some(outbound);
                self.resources.events = Some(events);
                self.resources.connection = Some(handle);
            }
            Err(e) => {
                self.handle(Event::StartFailed(SessionError::Connection(format!("{:#}", e))))
                    .await;
            }
        }
    }

    /// Start the microphone and forward its frames to the channel
    async fn start_capture(&mut self) -> Option<Event> {
        let (Some(capture), Some(outbound)) = (self.resources.capture.as_mut(), self.resources.outbound.clone())
        else {
            return Some(Event::StartFailed(SessionError::Microphone(
                "capture started without an open session".to_string(),
            )));
        };

        let frames = match capture.start().await {
            Ok(frames) => frames,
            Err(e) => return Some(Event::StartFailed(SessionError::Microphone(format!("{:#}", e)))),
        };

        let task = tokio::spawn(forward_frames(frames, outbound, Arc::clone(&self.frames_sent)));
        self.resources.capture_task = Some(task);

        info!(
            "Streaming microphone audio ({}Hz, {} samples per frame)",
            self.config.input_sample_rate, self.config.frame_size
        );
        None
    }

    /// Release every session resource
    ///
    /// Safe to call any number of times; each step is skipped once done and
    /// failures are logged, never returned.
    pub async fn teardown(&mut self) {
        if self.resources.is_released() {
            return;
        }

        let session_id = self.resources.session_id.take();
        info!("Tearing down session: {}", session_id.as_deref().unwrap_or("unknown"));

        if let Some(task) = self.resources.pending_connect.take() {
            task.abort();
            debug!("Abandoned channel handshake");
        }

        // Every outbound sender must be gone before the writer can close
        if let Some(task) = self.resources.capture_task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Capture forwarding task panicked: {}", e);
                }
            }
        }
        self.resources.outbound = None;

        if let Some(connection) = self.resources.connection.take() {
            connection.close().await;
        }
        self.resources.events = None;

        if let Some(mut capture) = self.resources.capture.take() {
            if let Err(e) = capture.stop().await {
                error!("Failed to stop {}: {:#}", capture.name(), e);
            }
        }

        if let Some(mut output) = self.resources.output.take() {
            let stopped = output.stop_all();
            if stopped > 0 {
                debug!("Stopped {} scheduled playback sources", stopped);
            }
            if !output.is_closed() {
                if let Err(e) = output.close() {
                    error!("Failed to close {}: {:#}", output.name(), e);
                }
            }
        }
        self.resources.ended = None;

        info!("Session resources released");
    }
}

async fn forward_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    outbound: mpsc::Sender<MediaBlob>,
    frames_sent: Arc<AtomicU64>,
) {
    while let Some(frame) = frames.recv().await {
        let blob = encode_block(&frame.samples, frame.sample_rate);
        if outbound.send(blob).await.is_err() {
            debug!("Channel closed, stopping frame forwarding");
            break;
        }
        frames_sent.fetch_add(1, Ordering::SeqCst);
    }
}

/// Next channel event, or pending forever when no channel is open
///
/// A channel that ends without a close frame reads as closed.
async fn next_channel_event(events: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>) -> ChannelEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or(ChannelEvent::Closed(None)),
        None => std::future::pending().await,
    }
}

async fn next_connected(
    pending: &mut Option<JoinHandle<anyhow::Result<LiveConnection>>>,
) -> Result<anyhow::Result<LiveConnection>, JoinError> {
    match pending {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn next_ended(ended: &mut Option<mpsc::UnboundedReceiver<SourceId>>) -> Option<SourceId> {
    match ended {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
