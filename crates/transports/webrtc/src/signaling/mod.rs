//! Signaling transports
//!
//! The session core only sees [`meshcall_core::SignalingTransport`]; this
//! module provides the WebSocket implementation used against the room
//! server.

pub mod client;

pub use client::{WsSignalingTransport, HANDSHAKE_TIMEOUT};
