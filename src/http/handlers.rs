use super::state::AppState;
use crate::session::{Command, SessionStats, Status, TranscriptEntry};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// Status at the time the command was queued
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: Status,
    pub error: Option<String>,
    pub current_input: String,
    pub current_output: String,
    pub pending_playback: usize,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/toggle
/// Start the session if idle, stop it otherwise
pub async fn toggle_session(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, Command::Toggle).await
}

/// POST /session/start
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, Command::Start).await
}

/// POST /session/stop
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, Command::Stop).await
}

async fn queue_command(state: &AppState, command: Command) -> axum::response::Response {
    let status = state.session.snapshot().status;
    info!("HTTP command {:?} (status={})", command, status);

    match state.session.send(command).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(CommandResponse {
                status,
                message: format!("{:?} queued", command),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to queue {:?}: {}", command, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();

    (
        StatusCode::OK,
        Json(StatusResponse {
            status: snapshot.status,
            error: snapshot.error,
            current_input: snapshot.current_input,
            current_output: snapshot.current_output,
            pending_playback: snapshot.pending_playback,
            stats: snapshot.stats,
        }),
    )
}

/// GET /session/transcript
/// Committed transcript entries, oldest first
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.session.snapshot().transcripts;
    (StatusCode::OK, Json(transcript))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
