//! Echo server: answers questions with their own payload, logs messages,
//! and serves a counting observable.
//!
//! ```sh
//! cargo run --example echo_server
//! cargo run --example echo_client
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_stream::wrappers::IntervalStream;
use tracing::info;
use wireline_session::{Authorizer, Connection, Server, ServerConfig, SessionHandler};

struct EchoHandler;

#[async_trait]
impl SessionHandler for EchoHandler {
    async fn on_connect(&self, _connection: &Connection) {
        info!("peer connected");
    }

    async fn on_close(&self, had_error: bool) {
        info!(had_error, "peer disconnected");
    }

    async fn on_message(&self, payload: Value) {
        info!(%payload, "message");
    }

    async fn on_question(&self, payload: Value) -> Result<Value, Value> {
        Ok(json!({ "echo": payload }))
    }

    async fn on_request_observable(&self, params: Value) -> Option<BoxStream<'static, Value>> {
        let count = params.get("count").and_then(Value::as_u64)?;
        let ticks = IntervalStream::new(tokio::time::interval(Duration::from_millis(200)))
            .enumerate()
            .map(|(i, _)| json!(i))
            .take(count as usize);
        Some(ticks.boxed())
    }
}

struct StaticTokenAuthorizer {
    token: String,
}

#[async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn authorize(
        &self,
        _connection: &Connection,
        token: &str,
    ) -> Option<Arc<dyn SessionHandler>> {
        (token == self.token).then(|| Arc::new(EchoHandler) as Arc<dyn SessionHandler>)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = Server::bind(
        "127.0.0.1:4000",
        Arc::new(StaticTokenAuthorizer {
            token: "demo".to_string(),
        }),
        ServerConfig::default().with_idle_timeout(Duration::from_secs(10)),
    )
    .await?;
    info!(addr = %server.local_addr(), "echo server running, token \"demo\"");

    tokio::signal::ctrl_c().await?;
    Ok(())
}
