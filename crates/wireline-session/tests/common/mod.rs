//! Shared fixtures for the session integration tests: a configurable
//! handler, a token-checking authorizer, and a raw wire-level peer for
//! asserting exact envelope traffic.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_stream::wrappers::IntervalStream;
use wireline_proto::{encode, Envelope, FrameReader};
use wireline_session::{
    connect, Authorizer, ClientConfig, Connection, Server, ServerConfig, SessionError,
    SessionHandler,
};

pub const TOKEN: &str = "sesame";

/// How the test handler answers questions.
#[derive(Clone, Copy)]
pub enum QuestionMode {
    /// Echo the payload back as the answer.
    Echo,
    /// Payload is `{"d": text, "t": delay_ms}`: sleep, answer `"<text> response"`.
    DelayByT,
    /// Reject every question with `"refused"`.
    Fail,
    /// Never answer within any test's lifetime.
    Stall,
}

/// How the test handler provides observables.
#[derive(Clone, Copy)]
pub enum ObservableMode {
    /// No sequence available.
    Refuse,
    /// Yield `0..n` immediately, then complete.
    Count(u64),
    /// Yield an incrementing counter forever, one value per period.
    Ticks(Duration),
}

pub struct TestHandler {
    pub messages: Mutex<Vec<Value>>,
    pub errors: Mutex<Vec<String>>,
    pub connect_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub closed_with_error: AtomicBool,
    pub observable_requests: AtomicUsize,
    pub connection: Mutex<Option<Connection>>,
    connected: Notify,
    closed: Notify,
    question_mode: QuestionMode,
    observable_mode: ObservableMode,
}

impl TestHandler {
    pub fn new() -> Arc<Self> {
        Self::with_modes(QuestionMode::Echo, ObservableMode::Count(3))
    }

    pub fn with_modes(question_mode: QuestionMode, observable_mode: ObservableMode) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed_with_error: AtomicBool::new(false),
            observable_requests: AtomicUsize::new(0),
            connection: Mutex::new(None),
            connected: Notify::new(),
            closed: Notify::new(),
            question_mode,
            observable_mode,
        })
    }

    pub async fn wait_connected(&self) {
        self.connected.notified().await;
    }

    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }

    pub fn connection(&self) -> Connection {
        self.connection.lock().unwrap().clone().expect("not connected")
    }
}

#[async_trait]
impl SessionHandler for TestHandler {
    async fn on_connect(&self, connection: &Connection) {
        *self.connection.lock().unwrap() = Some(connection.clone());
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.notify_one();
    }

    async fn on_close(&self, had_error: bool) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed_with_error.store(had_error, Ordering::SeqCst);
        self.closed.notify_one();
    }

    async fn on_message(&self, payload: Value) {
        self.messages.lock().unwrap().push(payload);
    }

    async fn on_question(&self, payload: Value) -> Result<Value, Value> {
        match self.question_mode {
            QuestionMode::Echo => Ok(payload),
            QuestionMode::DelayByT => {
                let text = payload
                    .get("d")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let delay = payload.get("t").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(json!(format!("{text} response")))
            }
            QuestionMode::Fail => Err(json!("refused")),
            QuestionMode::Stall => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Value::Null)
            }
        }
    }

    async fn on_request_observable(&self, _params: Value) -> Option<BoxStream<'static, Value>> {
        self.observable_requests.fetch_add(1, Ordering::SeqCst);
        match self.observable_mode {
            ObservableMode::Refuse => None,
            ObservableMode::Count(n) => Some(futures::stream::iter((0..n).map(|i| json!(i))).boxed()),
            ObservableMode::Ticks(period) => Some(
                IntervalStream::new(tokio::time::interval(period))
                    .enumerate()
                    .map(|(i, _)| json!(i))
                    .boxed(),
            ),
        }
    }

    fn on_error(&self, error: SessionError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Accepts any connection presenting the expected token.
pub struct TokenAuthorizer {
    pub token: String,
    pub handler: Arc<TestHandler>,
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(
        &self,
        _connection: &Connection,
        token: &str,
    ) -> Option<Arc<dyn SessionHandler>> {
        if token == self.token {
            Some(self.handler.clone())
        } else {
            None
        }
    }
}

/// Start a server on a loopback port with the given handler behind a
/// `TOKEN` check.
pub async fn start_server(handler: Arc<TestHandler>, config: ServerConfig) -> Server {
    Server::bind(
        "127.0.0.1:0",
        Arc::new(TokenAuthorizer {
            token: TOKEN.to_string(),
            handler,
        }),
        config,
    )
    .await
    .expect("bind")
}

/// Connect a client to `server` and wait until both sides saw `on_connect`.
pub async fn connect_client(server: &Server, handler: Arc<TestHandler>) -> Connection {
    connect_client_with(server, handler, None).await
}

pub async fn connect_client_with(
    server: &Server,
    handler: Arc<TestHandler>,
    idle_timeout: Option<Duration>,
) -> Connection {
    let mut config = ClientConfig::new("127.0.0.1", server.local_addr().port(), TOKEN);
    config.idle_timeout = idle_timeout;
    let connection = connect(config, handler.clone()).await.expect("connect");
    handler.wait_connected().await;
    connection
}

/// A peer speaking raw envelopes over TCP, for asserting exact wire traffic.
pub struct RawPeer {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> RawPeer {
        Self::from_stream(TcpStream::connect(addr).await.expect("connect"))
    }

    pub async fn accept(listener: &TcpListener) -> RawPeer {
        let (stream, _) = listener.accept().await.expect("accept");
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> RawPeer {
        let (reader, writer) = stream.into_split();
        RawPeer {
            reader: FrameReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, envelope: Envelope) {
        self.writer
            .write_all(&encode(&envelope).expect("encode"))
            .await
            .expect("send");
    }

    /// Next envelope, or `None` on EOF.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.reader.next_frame().await.expect("recv")
    }

    /// Next envelope within `window`, or `None` if the peer stayed silent.
    pub async fn recv_timeout(&mut self, window: Duration) -> Option<Envelope> {
        tokio::time::timeout(window, self.recv()).await.ok().flatten()
    }
}
