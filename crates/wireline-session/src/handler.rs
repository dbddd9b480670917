//! The callback surfaces an application implements.
//!
//! [`SessionHandler`] is the per-connection contract: exactly one
//! `on_connect` and one `on_close` per successfully-initialized connection,
//! and `on_message` / `on_question` / `on_request_observable` only after
//! `on_connect`. [`Authorizer`] is the listening-side accept/deny decision.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tracing::error;

use crate::connection::Connection;
use crate::error::SessionError;

/// Per-connection application callbacks.
///
/// Question answering runs in its own task, so a slow answer never blocks
/// the connection's envelope processing. `on_message` and
/// `on_request_observable` are awaited on the connection task itself and
/// should return promptly; a returned stream may then take as long as it
/// likes to produce values.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Called once when the handshake completes. The handler may clone and
    /// keep the [`Connection`].
    async fn on_connect(&self, _connection: &Connection) {}

    /// Called once when the connection ends. `had_error` is true when the
    /// close was caused by a transport, decode, or liveness failure.
    async fn on_close(&self, _had_error: bool) {}

    /// A fire-and-forget message from the peer.
    async fn on_message(&self, payload: Value);

    /// A question from the peer. `Ok` becomes a `resp` envelope, `Err` a
    /// `respError`; either way the payload travels back verbatim.
    async fn on_question(&self, payload: Value) -> Result<Value, Value>;

    /// The peer requests a streamed sequence. Return `None` when no
    /// sequence can be produced for `params`; the peer then receives an
    /// explicit error terminal.
    async fn on_request_observable(&self, params: Value) -> Option<BoxStream<'static, Value>>;

    /// A session-level error: decode failures, protocol anomalies,
    /// authentication failures. Default: structured log at error level.
    fn on_error(&self, error: SessionError) {
        error!(%error, "session error");
    }
}

/// Listening-side authorization collaborator.
///
/// Invoked once per inbound connection with the token presented in `init`.
/// Must be safe to call concurrently for distinct connections; the decision
/// may take as long as it needs without blocking other handshakes.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Accept the connection by returning its handler, or deny with `None`.
    async fn authorize(
        &self,
        connection: &Connection,
        token: &str,
    ) -> Option<Arc<dyn SessionHandler>>;
}
