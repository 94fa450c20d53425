//! Session channel to the Gemini Live bidirectional streaming API
//!
//! - `messages`: wire types for setup, streamed audio and server content
//! - `client`: the `Connector` seam and its WebSocket implementation

pub mod client;
pub mod messages;

pub use client::{ConnectRequest, ConnectionHandle, Connector, LiveConnection, WebSocketConnector};
pub use messages::{ChannelEvent, LiveMessage, ServerContent, ServerMessage, Setup};
