// Integration tests for the voice session controller
//
// The connector and devices are replaced with in-process fakes: the channel
// is a pair of mpsc queues and the output clock is a `Timeline` the test
// advances by hand. The handshake runs as its own task, so a start takes one
// `step` before the remote end exists.

use anyhow::{bail, Result};
use base64::Engine;
use liana::audio::pcm::pcm16_to_bytes;
use liana::audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, AudioOutput, MediaBlob, PcmBuffer, SourceId, Timeline,
};
use liana::live::{ConnectRequest, Connector, LiveConnection, LiveMessage};
use liana::session::{
    Command, DeviceProvider, SessionConfig, Snapshot, Speaker, Status, VoiceSession,
};
use liana::ChannelEvent;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Fakes
// ============================================================================

/// Remote end of a fake session channel
struct RemoteEnd {
    events: mpsc::UnboundedSender<ChannelEvent>,
    audio: mpsc::Receiver<MediaBlob>,
}

#[derive(Default)]
struct FakeConnector {
    connects: AtomicUsize,
    fail: bool,
    requests: Mutex<Vec<ConnectRequest>>,
    remote: Mutex<Option<RemoteEnd>>,
}

impl FakeConnector {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn take_remote(&self) -> RemoteEnd {
        self.remote
            .lock()
            .unwrap()
            .take()
            .expect("connector was never called")
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if self.fail {
            bail!("connection refused");
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *self.remote.lock().unwrap() = Some(RemoteEnd {
            events: events_tx,
            audio: outbound_rx,
        });

        Ok(LiveConnection::new(outbound_tx, events_rx))
    }
}

/// Connector whose handshake never finishes
#[derive(Default)]
struct StalledConnector {
    connects: AtomicUsize,
}

#[async_trait::async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _request: ConnectRequest) -> Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

struct FakeCapture {
    frames: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    capturing: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl AudioBackend for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(8);
        *self.frames.lock().unwrap() = Some(tx);
        self.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.frames.lock().unwrap().take();
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

struct FakeOutput {
    timeline: Arc<Mutex<Timeline>>,
    closed: Arc<AtomicBool>,
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.timeline.lock().unwrap().current_time()
    }

    fn schedule(&mut self, id: SourceId, start_at: f64, buffer: PcmBuffer) -> Result<f64> {
        Ok(self.timeline.lock().unwrap().schedule(id, start_at, buffer))
    }

    fn stop_all(&mut self) -> usize {
        self.timeline.lock().unwrap().stop_all()
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake speaker"
    }
}

#[derive(Default)]
struct FakeDevices {
    inputs_opened: AtomicUsize,
    outputs_opened: AtomicUsize,
    deny_microphone: bool,
    frames: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    capturing: Arc<AtomicBool>,
    output_closed: Arc<AtomicBool>,
    timeline: Mutex<Option<Arc<Mutex<Timeline>>>>,
}

impl FakeDevices {
    fn without_microphone() -> Self {
        Self {
            deny_microphone: true,
            ..Self::default()
        }
    }

    fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frames.lock().unwrap().clone().expect("capture not started")
    }

    /// Move the output clock forward, as if the device played `frames`
    fn play(&self, frames: u64) {
        let timeline = self.timeline.lock().unwrap().clone().expect("output not opened");
        timeline.lock().unwrap().advance(frames);
    }
}

#[async_trait::async_trait]
impl DeviceProvider for FakeDevices {
    fn open_input(&self, _config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        if self.deny_microphone {
            bail!("permission denied");
        }
        Ok(Box::new(FakeCapture {
            frames: Arc::clone(&self.frames),
            capturing: Arc::clone(&self.capturing),
        }))
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);
        self.output_closed.store(false, Ordering::SeqCst);
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate, ended_tx)));
        *self.timeline.lock().unwrap() = Some(Arc::clone(&timeline));
        Ok(Box::new(FakeOutput {
            timeline,
            closed: Arc::clone(&self.output_closed),
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config_with_key() -> SessionConfig {
    SessionConfig::default().with_credential("test-key")
}

fn session(
    config: SessionConfig,
    connector: &Arc<FakeConnector>,
    devices: &Arc<FakeDevices>,
) -> (VoiceSession, liana::SessionHandle) {
    let connector: Arc<dyn Connector> = connector.clone();
    let devices: Arc<dyn DeviceProvider> = devices.clone();
    VoiceSession::new(config, connector, devices)
}

fn audio_fragment(samples: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&vec![4096; samples]))
}

async fn step(session: &mut VoiceSession) -> Result<()> {
    let running = tokio::time::timeout(Duration::from_secs(5), session.step()).await?;
    assert!(running, "session loop ended unexpectedly");
    Ok(())
}

/// Start a session and let the handshake task deliver its result
async fn start(session: &mut VoiceSession, command: Command) -> Result<()> {
    session.handle_command(command).await;
    step(session).await
}

async fn wait_for(updates: &mut tokio::sync::watch::Receiver<Snapshot>, status: Status) -> Result<Snapshot> {
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.status == status || updates.changed().await.is_err() {
                break snapshot;
            }
        }
    })
    .await?;
    Ok(snapshot)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_missing_credential_never_touches_devices() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(SessionConfig::default(), &connector, &devices);

    session.handle_command(Command::Toggle).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(snapshot.error.as_deref(), Some("API_KEY environment variable not set."));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 0);
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 0);
    assert!(session.is_released());

    Ok(())
}

#[tokio::test]
async fn test_start_opens_devices_then_channel() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;

    assert_eq!(handle.snapshot().status, Status::Connecting);
    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert!(!devices.capturing.load(Ordering::SeqCst), "Capture waits for the open event");

    let requests = connector.requests.lock().unwrap().clone();
    assert_eq!(requests[0].api_key, "test-key");
    assert_eq!(requests[0].setup.model, "models/gemini-2.5-flash-native-audio-preview-09-2025");

    Ok(())
}

#[tokio::test]
async fn test_stop_twice_releases_everything() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;
    let remote = connector.take_remote();
    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;
    assert!(devices.capturing.load(Ordering::SeqCst));

    session.handle_command(Command::Stop).await;
    session.handle_command(Command::Stop).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Idle);
    assert_eq!(snapshot.error, None);
    assert!(session.is_released());
    assert!(!devices.capturing.load(Ordering::SeqCst));
    assert!(devices.output_closed.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_conversation_round_trip() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Toggle).await?;
    let mut remote = connector.take_remote();

    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;
    assert_eq!(handle.snapshot().status, Status::Listening);

    // Microphone frames reach the channel as 16kHz PCM blobs
    devices
        .frame_sender()
        .send(AudioFrame {
            samples: vec![0.5; 4096],
            sample_rate: 16000,
            timestamp_ms: 0,
        })
        .await?;
    let blob = tokio::time::timeout(Duration::from_secs(5), remote.audio.recv())
        .await?
        .expect("audio frame");
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    assert_eq!(base64::engine::general_purpose::STANDARD.decode(&blob.data)?.len(), 8192);

    remote.events.send(ChannelEvent::Message(LiveMessage {
        input_text: Some("Salam".to_string()),
        ..LiveMessage::default()
    }))?;
    step(&mut session).await?;
    assert_eq!(handle.snapshot().current_input, "Salam");

    // 0.1s of speech at 24kHz
    remote.events.send(ChannelEvent::Message(LiveMessage {
        output_text: Some("Salam! Chetori?".to_string()),
        turn_complete: true,
        audio: Some(audio_fragment(2400)),
        ..LiveMessage::default()
    }))?;
    step(&mut session).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Speaking);
    assert_eq!(snapshot.pending_playback, 1);
    assert_eq!(snapshot.transcripts.len(), 2);
    assert_eq!(snapshot.transcripts[0].speaker, Speaker::User);
    assert_eq!(snapshot.transcripts[1].text, "Salam! Chetori?");

    devices.play(2400);
    step(&mut session).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Listening);
    assert_eq!(snapshot.pending_playback, 0);

    session.handle_command(Command::Toggle).await;
    assert!(session.is_released());
    assert_eq!(handle.snapshot().stats.frames_sent, 1);
    assert_eq!(handle.snapshot().stats.fragments_received, 1);

    // Outbound queue is closed once the session is gone
    assert!(remote.audio.recv().await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_consecutive_fragments_do_not_overlap() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;
    let remote = connector.take_remote();
    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;

    for _ in 0..3 {
        remote.events.send(ChannelEvent::Message(LiveMessage {
            audio: Some(audio_fragment(1200)),
            ..LiveMessage::default()
        }))?;
        step(&mut session).await?;
    }
    assert_eq!(handle.snapshot().pending_playback, 3);

    // Fragments play one after another: only the first has finished
    devices.play(1200);
    step(&mut session).await?;
    assert_eq!(handle.snapshot().pending_playback, 2);
    assert_eq!(handle.snapshot().status, Status::Speaking);

    devices.play(2400);
    step(&mut session).await?;
    step(&mut session).await?;
    assert_eq!(handle.snapshot().pending_playback, 0);
    assert_eq!(handle.snapshot().status, Status::Listening);

    Ok(())
}

#[tokio::test]
async fn test_channel_error_tears_down_and_ignores_late_messages() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;
    let remote = connector.take_remote();
    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;

    remote.events.send(ChannelEvent::Error("socket reset".to_string()))?;
    remote
        .events
        .send(ChannelEvent::Message(LiveMessage {
            input_text: Some("late".to_string()),
            ..LiveMessage::default()
        }))
        .ok();
    step(&mut session).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("An error occurred with the assistant. Please try again.")
    );
    assert!(snapshot.current_input.is_empty());
    assert!(session.is_released());
    assert!(devices.output_closed.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_remote_close_returns_to_idle() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;
    let remote = connector.take_remote();
    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;

    // Dropping the remote end reads as a close without reason
    drop(remote);
    step(&mut session).await?;

    assert_eq!(handle.snapshot().status, Status::Idle);
    assert_eq!(handle.snapshot().error, None);
    assert!(session.is_released());

    Ok(())
}

#[tokio::test]
async fn test_connection_failure_reports_error() -> Result<()> {
    let connector = Arc::new(FakeConnector::failing());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Failed to start session. Please check your connection and try again.")
    );
    assert!(session.is_released());
    assert!(devices.output_closed.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_stops_before_connecting() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::without_microphone());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    session.handle_command(Command::Start).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Failed to start session. Please check microphone permissions and try again.")
    );
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 0);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert!(session.is_released());

    // The user can try again
    session.handle_command(Command::Toggle).await;
    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 2);

    Ok(())
}

#[tokio::test]
async fn test_run_until_shutdown() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (session, handle) = session(config_with_key(), &connector, &devices);
    let mut updates = handle.subscribe();

    let controller = tokio::spawn(session.run());

    handle.send(Command::Start).await?;
    let snapshot: Snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if updates.changed().await.is_err() {
                break Snapshot::default();
            }
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.status == Status::Connecting {
                break snapshot;
            }
        }
    })
    .await?;
    assert_eq!(snapshot.status, Status::Connecting);

    handle.send(Command::Shutdown).await?;
    tokio::time::timeout(Duration::from_secs(5), controller).await??;

    assert_eq!(handle.snapshot().status, Status::Idle);
    assert!(handle.send(Command::Toggle).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_stop_during_handshake_releases_devices() -> Result<()> {
    let connector = Arc::new(StalledConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (session, handle) = VoiceSession::new(
        config_with_key(),
        connector.clone() as Arc<dyn Connector>,
        devices.clone() as Arc<dyn DeviceProvider>,
    );
    let mut updates = handle.subscribe();
    let controller = tokio::spawn(session.run());

    handle.send(Command::Start).await?;
    let snapshot = wait_for(&mut updates, Status::Connecting).await?;
    assert_eq!(snapshot.status, Status::Connecting, "Connecting is visible during the handshake");

    // The loop still takes commands while the handshake hangs
    handle.send(Command::Stop).await?;
    let snapshot = wait_for(&mut updates, Status::Idle).await?;
    assert_eq!(snapshot.status, Status::Idle);
    assert_eq!(snapshot.error, None);
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 1);
    assert!(devices.output_closed.load(Ordering::SeqCst));
    assert!(!devices.capturing.load(Ordering::SeqCst));

    handle.send(Command::Shutdown).await?;
    tokio::time::timeout(Duration::from_secs(5), controller).await??;

    Ok(())
}

#[tokio::test]
async fn test_stop_while_connecting_cancels_handshake() -> Result<()> {
    let connector = Arc::new(StalledConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = VoiceSession::new(
        config_with_key(),
        connector.clone() as Arc<dyn Connector>,
        devices.clone() as Arc<dyn DeviceProvider>,
    );

    session.handle_command(Command::Start).await;
    assert_eq!(handle.snapshot().status, Status::Connecting);
    assert!(!session.is_released(), "Devices and the handshake are held");

    session.handle_command(Command::Stop).await;

    assert_eq!(handle.snapshot().status, Status::Idle);
    assert!(session.is_released());
    assert!(devices.output_closed.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout_reports_connection_error() -> Result<()> {
    let connector = Arc::new(StalledConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let config = config_with_key().with_connect_timeout(Duration::from_millis(50));
    let (mut session, handle) = VoiceSession::new(
        config,
        connector.clone() as Arc<dyn Connector>,
        devices.clone() as Arc<dyn DeviceProvider>,
    );

    start(&mut session, Command::Start).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Failed to start session. Please check your connection and try again.")
    );
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert!(session.is_released());
    assert!(devices.output_closed.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_interruption_silences_queued_speech() -> Result<()> {
    let connector = Arc::new(FakeConnector::default());
    let devices = Arc::new(FakeDevices::default());
    let (mut session, handle) = session(config_with_key(), &connector, &devices);

    start(&mut session, Command::Start).await?;
    let remote = connector.take_remote();
    remote.events.send(ChannelEvent::Opened)?;
    step(&mut session).await?;

    for _ in 0..3 {
        remote.events.send(ChannelEvent::Message(LiveMessage {
            audio: Some(audio_fragment(2400)),
            ..LiveMessage::default()
        }))?;
        step(&mut session).await?;
    }
    assert_eq!(handle.snapshot().status, Status::Speaking);

    remote.events.send(ChannelEvent::Message(LiveMessage {
        interrupted: true,
        ..LiveMessage::default()
    }))?;
    step(&mut session).await?;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, Status::Listening);
    assert_eq!(snapshot.pending_playback, 0);
    assert_eq!(snapshot.stats.interruptions, 1);

    // The dropped fragments never play, so the next reply starts right away
    devices.play(12000);
    remote.events.send(ChannelEvent::Message(LiveMessage {
        audio: Some(audio_fragment(1200)),
        ..LiveMessage::default()
    }))?;
    step(&mut session).await?;
    assert_eq!(handle.snapshot().status, Status::Speaking);

    devices.play(1200);
    step(&mut session).await?;
    assert_eq!(handle.snapshot().status, Status::Listening);

    Ok(())
}
