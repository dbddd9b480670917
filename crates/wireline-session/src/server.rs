//! Listening side: TCP accept loop and responder attachment.
//!
//! [`Server::bind`] owns a plain TCP listener and spawns one responder task
//! per accepted connection. Hosts that manage their own listener (for
//! example to wrap sockets in TLS) accept streams themselves and hand them
//! to [`Server::attach`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::connection::{Connection, Role};
use crate::error::SessionError;
use crate::handler::Authorizer;

/// The listening endpoint.
pub struct Server {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind a TCP listener and start accepting connections.
    ///
    /// Every accepted connection performs the `init` handshake and is
    /// accepted or denied by `authorizer`; a slow decision on one
    /// connection never blocks the others.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        authorizer: Arc<dyn Authorizer>,
        config: ServerConfig,
    ) -> Result<Server, SessionError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "wireline: listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        Server::attach(stream, Arc::clone(&authorizer), &config);
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Server {
            local_addr,
            accept_task,
        })
    }

    /// Drive an externally-accepted stream (for example a TLS-wrapped
    /// socket) as a responder.
    pub fn attach<S>(stream: S, authorizer: Arc<dyn Authorizer>, config: &ServerConfig) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Connection::spawn(stream, Role::Responder { authorizer }, config.idle_timeout)
    }

    /// The bound address — useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Established connections keep
    /// running until they close themselves.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
