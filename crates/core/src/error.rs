//! Error taxonomy shared by the session client.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures raised while opening or driving the hub transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The negotiate request failed or returned an unusable body.
    #[error("hub negotiation failed: {0}")]
    Negotiate(String),
    /// HTTP client error during negotiation.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Websocket layer error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The server rejected or never answered the protocol handshake.
    #[error("hub handshake failed: {0}")]
    Handshake(String),
    /// The endpoint URL could not be built.
    #[error("invalid hub url: {0}")]
    Url(#[from] url::ParseError),
    /// A header value contained characters that cannot be sent.
    #[error("invalid header value for {0}")]
    Header(&'static str),
    /// Connecting took longer than the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The connection is gone.
    #[error("connection closed")]
    Closed,
}

/// A pushed or received payload did not have the expected shape.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Body was not valid JSON or did not match the target type.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field was absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// The payload parsed but breaks an invariant.
    #[error("{0}")]
    Invalid(String),
    /// The server reported a failed operation.
    #[error("server reported failure: {0}")]
    Rejected(String),
}

/// Local cache could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Stored bytes could not be (de)serialized.
    #[error("failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by the REST collaborator client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// No credential available, or refresh did not help.
    #[error("not authenticated: {0}")]
    Unauthorized(String),
    /// Non-success status other than 401.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body text or server message.
        message: String,
    },
    /// Response body could not be interpreted.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// Request URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Top level error for session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing or rejected credential. Never retried automatically.
    #[error("authentication required: {0}")]
    Authentication(String),
    /// Transport failure; retried according to the backoff policy.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Malformed server payload.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// Local cache failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Operation requires a live connection.
    #[error("not connected")]
    NotConnected,
}

impl SessionError {
    /// Whether the retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}

/// A command could not be queued on the command bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The queue is at capacity.
    #[error("command queue is full")]
    Full,
    /// The bus task has stopped.
    #[error("command bus stopped")]
    Closed,
}
