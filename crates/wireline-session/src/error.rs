//! Error types for the session layer.

use serde_json::Value;
use thiserror::Error;
use wireline_proto::CodecError;

/// Errors surfaced on the session API or through
/// [`SessionHandler::on_error`](crate::handler::SessionHandler::on_error).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record arrived that could not be decoded. Terminates the connection.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An unexpected envelope, or a response for an unknown correlation id.
    /// Reported but does not terminate the connection.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Fingerprint mismatch, rejected token, or a `denied` handshake answer.
    /// Terminates the connection.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// Terminal failure of an asked question. Exactly one of these (or a
/// successful response) resolves every question.
#[derive(Debug, Error)]
pub enum AskError {
    /// The peer answered with `respError`.
    #[error("peer rejected question: {0}")]
    Remote(Value),

    /// No response arrived within the question's timeout.
    #[error("question timed out")]
    Timeout,

    /// The connection closed before a response arrived.
    #[error("connection closed before response")]
    Closed,
}

/// Error terminal of a consumed observable sequence.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The peer reported that the sequence could not be produced.
    #[error("peer rejected subscription: {0}")]
    Remote(Value),
}
