//! User-visible session errors
//!
//! None of these are fatal to the process: each one puts the session into
//! the `error` status with its message, and the user can start again.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The API key environment variable is unset or empty
    #[error("{0} environment variable not set.")]
    MissingCredential(String),

    /// Microphone unavailable, permission denied, or capture failed to start
    #[error("Failed to start session. Please check microphone permissions and try again.")]
    Microphone(String),

    /// Output device unavailable
    #[error("Failed to start session. Please check your audio output device and try again.")]
    Speaker(String),

    /// The session could not be opened
    #[error("Failed to start session. Please check your connection and try again.")]
    Connection(String),

    /// The open session reported an error
    #[error("An error occurred with the assistant. Please try again.")]
    Channel(String),
}

impl SessionError {
    /// Underlying cause, for logs
    pub fn detail(&self) -> &str {
        match self {
            Self::MissingCredential(var) => var,
            Self::Microphone(detail)
            | Self::Speaker(detail)
            | Self::Connection(detail)
            | Self::Channel(detail) => detail,
        }
    }
}
