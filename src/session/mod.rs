//! Voice session management
//!
//! This module provides the `VoiceSession` controller that manages:
//! - Microphone capture and frame streaming to the Live API
//! - Scheduling of synthesized speech on the output clock
//! - Transcript accumulation and turn commits
//! - Status transitions and idempotent teardown

mod config;
mod controller;
mod devices;
mod playback;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::{Command, SessionHandle, VoiceSession};
pub use devices::{DeviceProvider, SystemDevices};
pub use playback::{PlaybackScheduler, ScheduledPlayback};
pub use state::{Effect, Event, SessionState, Snapshot, Status};
pub use stats::{SessionStats, Speaker, TranscriptEntry};
