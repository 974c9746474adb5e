//! src/connection/error.rs

use std::str::Utf8Error;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Everything that can go wrong on a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /* ───────────── Lifecycle ───────────── */
    #[error("connection is closed")]
    ConnectionClosed,

    /* ───────────── Transport / Handshake ───────────── */
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("close frame could not be sent in time")]
    CloseTimeout,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /* ───────────── Payload ───────────── */
    #[error("text payload is not valid UTF-8: {0}")]
    InvalidText(Utf8Error),
}

impl ConnectionError {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::ConnectionClosed)
    }
}
