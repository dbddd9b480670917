//! Connection configuration.
//!
//! Idle-keepalive intervals are explicit per-connection values; there is no
//! process-wide default to mutate.

use std::time::Duration;

/// Configuration for an outbound connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host the responder listens on.
    pub host: String,
    /// Port the responder listens on.
    pub port: u16,
    /// Opaque token presented in the `init` envelope.
    pub token: String,
    /// Pinned peer certificate fingerprint. When set, the connection is
    /// refused unless the transport presents a matching fingerprint.
    pub fingerprint: Option<String>,
    /// Idle interval this side advertises to the peer. Keepalive runs only
    /// when both sides advertise a nonzero interval.
    pub idle_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            fingerprint: None,
            idle_timeout: None,
        }
    }

    /// Pin the peer's certificate fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Advertise an idle-keepalive interval.
    pub fn with_idle_timeout(mut self, interval: Duration) -> Self {
        self.idle_timeout = Some(interval);
        self
    }
}

/// Configuration for the listening side.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Idle interval advertised to each accepted peer.
    pub idle_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Advertise an idle-keepalive interval.
    pub fn with_idle_timeout(mut self, interval: Duration) -> Self {
        self.idle_timeout = Some(interval);
        self
    }
}
