//! Home Assistant error types
//!
//! Two families with different blast radius:
//! - [`ConnectionError`] ends one WebSocket connection; the supervisor reconnects.
//! - [`FetchError`] ends one orchestrator decision; the display falls back to the clock.

use std::time::Duration;

use thiserror::Error;

/// Failure of one event connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The configured base URL is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Socket level failure (connect, read, write)
    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connect + auth + subscribe did not finish in time
    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// The server broke the handshake protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected the access token
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The subscribe request was not acknowledged with success
    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),

    /// The server closed the connection or the stream ended
    #[error("Connection closed")]
    Closed,
}

impl ConnectionError {
    /// Whether this failure came from the protocol rather than the socket
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::AuthFailed(_) | Self::SubscribeFailed(_)
        )
    }
}

/// Failure fetching state or picture bytes over REST
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request could not be sent or the body could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// The state body was not valid JSON for an entity
    #[error("Failed to decode entity state: {0}")]
    Decode(#[from] serde_json::Error),
}
