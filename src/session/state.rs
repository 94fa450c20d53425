//! Session state record and its transition function
//!
//! All session bookkeeping (status, transcript accumulators, playback
//! cursor, outstanding sources) lives in one `SessionState`. Every input,
//! whether user command, channel event, or playback completion, goes through
//! `SessionState::apply`, which mutates the record and returns the side
//! effects the controller has to perform. Nothing here does I/O.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::playback::PlaybackScheduler;
use super::stats::{SessionStats, Speaker, TranscriptEntry};
use crate::audio::{decode_fragment, PcmBuffer, SourceId};
use crate::error::SessionError;
use crate::live::LiveMessage;

/// Presentation status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Connecting,
    Listening,
    Speaking,
    Error,
}

impl Status {
    /// A session exists (possibly still opening)
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Speaking)
    }

    /// The channel is open and audio flows
    pub fn is_open(self) -> bool {
        matches!(self, Self::Listening | Self::Speaking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone)]
pub enum Event {
    /// Start if idle or errored, stop otherwise
    Toggle { has_credential: bool },
    Start { has_credential: bool },
    Stop,
    /// Acquiring devices or opening the channel failed
    StartFailed(SessionError),
    ChannelOpened,
    /// Server message, with the output clock time at arrival
    Message { message: LiveMessage, now: f64 },
    ChannelError(String),
    ChannelClosed(Option<String>),
    /// The output placed a fragment at `start` seconds on its clock
    PlaybackStarted { id: SourceId, start: f64 },
    PlaybackEnded(SourceId),
}

/// Work the controller performs on behalf of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Acquire the microphone and output, then open the channel
    Connect,
    /// Begin streaming captured frames to the channel
    StartCapture,
    /// Schedule a decoded fragment on the output clock
    Play {
        id: SourceId,
        start_at: f64,
        buffer: PcmBuffer,
    },
    /// Silence everything scheduled on the output
    StopPlayback,
    /// Release every session resource (idempotent)
    Teardown,
}

/// Everything the presentation layer shows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: Status,
    pub error: Option<String>,
    pub transcripts: Vec<TranscriptEntry>,
    pub current_input: String,
    pub current_output: String,
    /// Fragments scheduled but not yet finished
    pub pending_playback: usize,
    pub stats: SessionStats,
}

/// Owned session state
#[derive(Debug)]
pub struct SessionState {
    pub status: Status,
    pub error: Option<String>,
    pub transcripts: Vec<TranscriptEntry>,
    pub current_input: String,
    pub current_output: String,
    pub playback: PlaybackScheduler,
    pub stats: SessionStats,
    output_sample_rate: u32,
    credential_var: String,
}

impl SessionState {
    pub fn new(output_sample_rate: u32, credential_var: impl Into<String>) -> Self {
        Self {
            status: Status::Idle,
            error: None,
            transcripts: Vec::new(),
            current_input: String::new(),
            current_output: String::new(),
            playback: PlaybackScheduler::new(),
            stats: SessionStats::default(),
            output_sample_rate,
            credential_var: credential_var.into(),
        }
    }

    /// Apply one event, returning the effects to run in order
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let before = self.status;

        let effects = match event {
            Event::Toggle { has_credential } => {
                if self.status.is_active() {
                    self.stop()
                } else {
                    self.start(has_credential)
                }
            }
            Event::Start { has_credential } => self.start(has_credential),
            Event::Stop => self.stop(),
            Event::StartFailed(err) => self.fail(err),
            Event::ChannelOpened => self.opened(),
            Event::Message { message, now } => self.message(message, now),
            Event::ChannelError(detail) => {
                if self.status.is_active() {
                    self.fail(SessionError::Channel(detail))
                } else {
                    debug!("Ignoring channel error after teardown: {}", detail);
                    Vec::new()
                }
            }
            Event::ChannelClosed(reason) => {
                if self.status.is_active() {
                    info!("Session closed: {}", reason.as_deref().unwrap_or("no reason"));
                    self.status = Status::Idle;
                    self.reset_session();
                    vec![Effect::Teardown]
                } else {
                    Vec::new()
                }
            }
            Event::PlaybackStarted { id, start } => {
                if self.playback.confirm(id, start) {
                    debug!(
                        "Fragment {} started late at {:.3}s, cursor now {:.3}s",
                        id,
                        start,
                        self.playback.cursor()
                    );
                }
                Vec::new()
            }
            Event::PlaybackEnded(id) => {
                if self.playback.finish(id) && self.status == Status::Speaking {
                    self.status = Status::Listening;
                }
                Vec::new()
            }
        };

        if self.status != before {
            info!("Status: {} -> {}", before, self.status);
        }

        effects
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            error: self.error.clone(),
            transcripts: self.transcripts.clone(),
            current_input: self.current_input.clone(),
            current_output: self.current_output.clone(),
            pending_playback: self.playback.outstanding(),
            stats: self.stats.clone(),
        }
    }

    fn start(&mut self, has_credential: bool) -> Vec<Effect> {
        if self.status.is_active() {
            debug!("Start ignored: session already {}", self.status);
            return Vec::new();
        }

        if !has_credential {
            let err = SessionError::MissingCredential(self.credential_var.clone());
            warn!("{}", err);
            self.error = Some(err.to_string());
            self.status = Status::Error;
            return Vec::new();
        }

        self.status = Status::Connecting;
        self.error = None;
        self.transcripts.clear();
        self.stats = SessionStats {
            started_at: Some(Utc::now()),
            ..SessionStats::default()
        };
        self.reset_session();

        vec![Effect::Connect]
    }

    fn stop(&mut self) -> Vec<Effect> {
        self.status = Status::Idle;
        self.error = None;
        self.reset_session();
        vec![Effect::Teardown]
    }

    fn fail(&mut self, err: SessionError) -> Vec<Effect> {
        warn!("Session failed: {} ({})", err, err.detail());
        self.error = Some(err.to_string());
        self.status = Status::Error;
        self.reset_session();
        vec![Effect::Teardown]
    }

    fn opened(&mut self) -> Vec<Effect> {
        if self.status != Status::Connecting {
            debug!("Ignoring open event while {}", self.status);
            return Vec::new();
        }
        self.status = Status::Listening;
        vec![Effect::StartCapture]
    }

    fn message(&mut self, message: LiveMessage, now: f64) -> Vec<Effect> {
        if !self.status.is_open() {
            debug!("Discarding server message while {}", self.status);
            return Vec::new();
        }

        let mut effects = Vec::new();

        if message.interrupted {
            let dropped = self.playback.outstanding();
            info!("Assistant interrupted, dropping {} queued fragments", dropped);
            self.playback.reset();
            self.stats.interruptions += 1;
            if self.status == Status::Speaking {
                self.status = Status::Listening;
            }
            effects.push(Effect::StopPlayback);
        }

        if let Some(text) = message.output_text {
            self.current_output.push_str(&text);
        }
        if let Some(text) = message.input_text {
            self.current_input.push_str(&text);
        }

        if message.turn_complete {
            self.commit_turn();
        }

        let Some(data) = message.audio else {
            return effects;
        };

        let buffer = match decode_fragment(&data, self.output_sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping undecodable audio fragment: {:#}", e);
                return effects;
            }
        };
        if buffer.is_empty() {
            return effects;
        }

        self.stats.fragments_received += 1;
        let slot = self.playback.schedule(now, buffer.duration());
        self.status = Status::Speaking;

        debug!(
            "Scheduled fragment {} at {:.3}s-{:.3}s ({} outstanding)",
            slot.id,
            slot.start,
            slot.end,
            self.playback.outstanding()
        );

        effects.push(Effect::Play {
            id: slot.id,
            start_at: slot.start,
            buffer,
        });
        effects
    }

    /// Commit the accumulated turn: user text first, then assistant text
    fn commit_turn(&mut self) {
        let input = std::mem::take(&mut self.current_input);
        let output = std::mem::take(&mut self.current_output);
        let timestamp = Utc::now();

        for (speaker, text) in [(Speaker::User, input), (Speaker::Assistant, output)] {
            let text = text.trim();
            if !text.is_empty() {
                self.transcripts.push(TranscriptEntry {
                    speaker,
                    text: text.to_string(),
                    timestamp,
                });
            }
        }

        self.stats.turns_completed += 1;
    }

    /// Per-session bookkeeping that never outlives a session
    fn reset_session(&mut self) {
        self.current_input.clear();
        self.current_output.clear();
        self.playback.reset();
    }
}
