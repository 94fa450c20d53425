//! HTTP API for external control of the voice session
//!
//! - POST /session/toggle - Start if idle, stop otherwise
//! - POST /session/start - Start a session
//! - POST /session/stop - Stop the session
//! - GET /session/status - Status, live text and counters
//! - GET /session/transcript - Committed transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
