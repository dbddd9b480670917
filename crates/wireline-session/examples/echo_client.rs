//! Client for the echo server example: sends two messages, asks a
//! question, and consumes a five-value observable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::info;
use wireline_session::{connect, ClientConfig, SessionHandler};

struct ClientHandler;

#[async_trait]
impl SessionHandler for ClientHandler {
    async fn on_message(&self, payload: Value) {
        info!(%payload, "message from server");
    }

    async fn on_question(&self, _payload: Value) -> Result<Value, Value> {
        Err(json!("this client answers no questions"))
    }

    async fn on_request_observable(&self, _params: Value) -> Option<BoxStream<'static, Value>> {
        None
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

    let config = ClientConfig::new("127.0.0.1", 4000, "demo")
        .with_idle_timeout(Duration::from_secs(10));
    let connection = connect(config, Arc::new(ClientHandler)).await?;

    connection.send_message(json!("test1"))?;
    connection.send_message(json!("test2"))?;

    let answer = connection.ask(json!({"question": "anyone home?"})).await?;
    info!(%answer, "answer");

    let mut ticks = connection
        .request_observable(json!({"count": 5}))
        .subscribe()
        .await?;
    while let Some(tick) = ticks.next().await {
        info!(tick = %tick?, "observable value");
    }

    connection.close();
    Ok(())
}
