//! Outbound connections.
//!
//! [`connect`] dials plain TCP. TLS (or any other secured byte stream)
//! plugs in through the [`Transport`] seam: the transport supplies the
//! stream plus the certificate fingerprint the peer presented, and the
//! session layer compares that against the pinned fingerprint before
//! sending `init`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::{Connection, Role};
use crate::error::SessionError;
use crate::handler::SessionHandler;

/// A freshly established byte stream, plus the certificate fingerprint the
/// peer presented — `None` for transports without certificates.
pub struct Connected<S> {
    pub stream: S,
    pub fingerprint: Option<String>,
}

/// Transport collaborator: supplies the bidirectional byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn connect(&self, host: &str, port: u16) -> Result<Connected<Self::Stream>, SessionError>;
}

/// Plain TCP transport. Presents no fingerprint, so it cannot satisfy a
/// pinned one.
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<Connected<TcpStream>, SessionError> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Connected {
            stream,
            fingerprint: None,
        })
    }
}

/// Connect over plain TCP and initiate the handshake.
///
/// Returns as soon as `init` is on its way; `on_connect` fires when the
/// responder accepts, `on_error` when it denies.
pub async fn connect(
    config: ClientConfig,
    handler: Arc<dyn SessionHandler>,
) -> Result<Connection, SessionError> {
    connect_with(&TcpTransport, config, handler).await
}

/// Connect through a custom [`Transport`] and initiate the handshake.
///
/// When the config pins a fingerprint, the transport's presented
/// fingerprint must match exactly; otherwise the connection is dropped
/// before `init` is sent and the failure is reported both to the handler
/// and to the caller.
pub async fn connect_with<T: Transport>(
    transport: &T,
    config: ClientConfig,
    handler: Arc<dyn SessionHandler>,
) -> Result<Connection, SessionError> {
    let connected = transport.connect(&config.host, config.port).await?;

    if let Some(expected) = &config.fingerprint {
        let presented = connected.fingerprint.as_deref();
        if presented != Some(expected.as_str()) {
            let detail = match presented {
                Some(got) => format!("peer presented fingerprint {got}, expected {expected}"),
                None => format!("transport presented no fingerprint, expected {expected}"),
            };
            handler.on_error(SessionError::Authentication(detail.clone()));
            return Err(SessionError::Authentication(detail));
        }
    }

    debug!(host = %config.host, port = config.port, "connected, initiating handshake");
    Ok(Connection::spawn(
        connected.stream,
        Role::Initiator {
            token: config.token,
            handler,
        },
        config.idle_timeout,
    ))
}
