pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod ui;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioOutput,
    AudioOutputFactory, AudioSink, AudioSource, PcmBuffer, Timeline,
};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use live::{ChannelEvent, Connector, LiveConnection, LiveMessage, WebSocketConnector};
pub use session::{
    Command, SessionConfig, SessionHandle, SessionState, Snapshot, Status, SystemDevices,
    TranscriptEntry, VoiceSession,
};
pub use ui::TerminalUi;
