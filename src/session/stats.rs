use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for the current (or last) session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the session was started
    pub started_at: Option<DateTime<Utc>>,

    /// Audio frames handed to the channel
    pub frames_sent: u64,

    /// Audio fragments received for playback
    pub fragments_received: u64,

    /// Turn-complete signals received
    pub turns_completed: u64,

    /// Times the user talked over queued speech
    pub interruptions: u64,
}

/// Who said a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One finalized utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,

    /// Trimmed, never empty
    pub text: String,

    /// When the turn was committed
    pub timestamp: DateTime<Utc>,
}
