// ===============================
// src/error.rs
// ===============================

use thiserror::Error;

/// Errors surfaced by the adapter layer.
///
/// Streaming-side failures are not represented here: normalization misses
/// are logged and dropped, and socket loss is retried inside the connection
/// manager and only visible through `is_connected()`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// An operation was invoked before `configure()` supplied a `VenueConfig`.
    #[error("adapter not configured: {0}")]
    Configuration(String),

    /// The streaming socket could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// A REST call returned a non-2xx response. Carries the HTTP status and
    /// the raw response body; never retried automatically.
    #[error("request failed: {status} - {body}")]
    Request { status: u16, body: String },

    /// Client-side order validation failed before any network call.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Transport-level failure (DNS, TLS, timeout, connect).
    #[error("transport error: {0}")]
    Transport(String),

    /// A REST response body did not match the venue's documented shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl AdapterError {
    pub fn request(status: u16, body: impl Into<String>) -> Self {
        Self::Request {
            status,
            body: body.into(),
        }
    }

    pub fn not_configured(what: &str) -> Self {
        Self::Configuration(format!("{what} requires configure() first"))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
