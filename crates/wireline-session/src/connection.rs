//! Connection state machine and multiplexing layer.
//!
//! Each connection is driven by one tokio task that owns the stream and all
//! multiplexing tables: pending questions, registered stream consumers, and
//! active stream producers. The [`Connection`] handle is a cheap clone
//! around a command channel into that task, so every table mutation happens
//! on the delivery of one envelope or one command — never concurrently.
//!
//! Until the handshake completes, only `init`/`accepted`/`denied` are
//! processed; anything else arriving early is ignored and logged. After
//! completion, handshake envelopes are never re-processed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};
use wireline_proto::{encode, CodecError, Envelope, FrameReader, Kind};

use crate::error::{AskError, SessionError};
use crate::handler::{Authorizer, SessionHandler};
use crate::observable::{ObservableRequest, ObserverEvent};

/// Default timeout for [`Connection::ask`].
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Which side of the handshake this connection plays.
pub(crate) enum Role {
    /// Sends `init`, awaits `accepted` or `denied`.
    Initiator {
        token: String,
        handler: Arc<dyn SessionHandler>,
    },
    /// Awaits `init`, asks the authorizer to accept or deny.
    Responder { authorizer: Arc<dyn Authorizer> },
}

/// Counts of live multiplexer table entries, for tests and introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Questions awaiting a response from the peer.
    pub pending_questions: usize,
    /// Local consumers of peer-produced sequences.
    pub consumers: usize,
    /// Local producers feeding peer-consumed sequences.
    pub producers: usize,
}

/// Commands from [`Connection`] handles and helper tasks into the
/// connection task.
pub(crate) enum Command {
    SendMessage(Value),
    Ask {
        payload: Value,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value, AskError>>,
    },
    /// A question's deadline timer fired.
    AskDeadline(u64),
    Subscribe {
        params: Value,
        events: mpsc::UnboundedSender<ObserverEvent>,
        reply: oneshot::Sender<u64>,
    },
    /// The local consumer stopped consuming before a terminal event.
    Unsubscribe(u64),
    /// The handler finished answering an inbound question.
    Answer {
        id: u64,
        result: Result<Value, Value>,
    },
    /// A local producer yielded a value for the peer.
    Forward { id: u64, value: Value },
    /// A local producer's sequence ended naturally.
    ForwardComplete(u64),
    Stats(oneshot::Sender<ConnectionStats>),
    Close,
}

/// Handle to one peer connection.
///
/// Cloning is cheap; all clones drive the same underlying session. Dropping
/// every handle does not close the connection — use [`Connection::close`]
/// or rely on the peer/transport.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Send a fire-and-forget message to the peer.
    pub fn send_message(&self, payload: Value) -> Result<(), SessionError> {
        self.commands
            .send(Command::SendMessage(payload))
            .map_err(|_| SessionError::Closed)
    }

    /// Ask the peer a question with the default 2000 ms timeout.
    pub async fn ask(&self, payload: Value) -> Result<Value, AskError> {
        self.ask_with_timeout(payload, DEFAULT_ASK_TIMEOUT).await
    }

    /// Ask the peer a question, resolving with its answer or rejecting on
    /// `respError`, timeout, or connection close — whichever happens first.
    /// Outstanding questions are independent: a slow answer never delays a
    /// faster one asked earlier.
    pub async fn ask_with_timeout(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, AskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Ask {
                payload,
                timeout,
                reply: reply_tx,
            })
            .map_err(|_| AskError::Closed)?;
        reply_rx.await.map_err(|_| AskError::Closed)?
    }

    /// Request a peer-produced sequence. The request is cold: nothing is
    /// sent until the returned handle is subscribed.
    pub fn request_observable(&self, params: Value) -> ObservableRequest {
        ObservableRequest::new(self.commands.clone(), params)
    }

    /// Snapshot of the multiplexer tables.
    pub async fn stats(&self) -> Result<ConnectionStats, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Close the session. The peer observes an ordinary close.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Spawn the connection task over `stream` and return its handle.
    pub(crate) fn spawn<S>(stream: S, role: Role, idle_timeout: Option<Duration>) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connection = Connection {
            commands: cmd_tx.clone(),
        };
        let (read_half, write_half) = tokio::io::split(stream);
        let task = ConnectionTask {
            reader: FrameReader::new(read_half),
            writer: write_half,
            commands: cmd_tx,
            command_rx: cmd_rx,
            questions: HashMap::new(),
            consumers: HashMap::new(),
            producers: HashMap::new(),
            next_question_id: 0,
            next_sequence_id: 0,
            last_tx: Instant::now(),
            last_rx: Instant::now(),
            own_hint: idle_timeout.filter(|d| !d.is_zero()),
            peer_hint: None,
            initialized: false,
        };
        tokio::spawn(task.run(role, connection.clone()));
        connection
    }
}

struct PendingQuestion {
    reply: oneshot::Sender<Result<Value, AskError>>,
    timer: AbortHandle,
}

struct StreamProducer {
    forward: AbortHandle,
}

struct ConnectionTask<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    /// Sender side of our own command channel, cloned into helper tasks
    /// (question timers, answer tasks, producer forwarders).
    commands: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    questions: HashMap<u64, PendingQuestion>,
    consumers: HashMap<u64, mpsc::UnboundedSender<ObserverEvent>>,
    /// Producers are keyed by the peer's sequence id.
    producers: HashMap<u64, StreamProducer>,
    next_question_id: u64,
    next_sequence_id: u64,
    last_tx: Instant,
    last_rx: Instant,
    own_hint: Option<Duration>,
    peer_hint: Option<Duration>,
    initialized: bool,
}

impl<S> ConnectionTask<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self, role: Role, connection: Connection) {
        match role {
            Role::Initiator { token, handler } => {
                match self.handshake_initiator(&token, &handler, &connection).await {
                    Ok(true) => self.run_main(handler).await,
                    Ok(false) => self.teardown(false, Some(&handler)).await,
                    Err(_) => self.teardown(true, Some(&handler)).await,
                }
            }
            Role::Responder { authorizer } => {
                match self.handshake_responder(&authorizer, &connection).await {
                    Ok(Some(handler)) => self.run_main(handler).await,
                    Ok(None) => self.teardown(false, None).await,
                    Err(_) => self.teardown(true, None).await,
                }
            }
        }
    }

    /// Send `init` and wait for the responder's decision.
    ///
    /// `Ok(true)` means accepted; `Ok(false)` covers denial and clean EOF;
    /// `Err` covers transport and decode failures.
    async fn handshake_initiator(
        &mut self,
        token: &str,
        handler: &Arc<dyn SessionHandler>,
        connection: &Connection,
    ) -> Result<bool, SessionError> {
        let hint = self.own_hint.map(|d| d.as_millis() as u64);
        self.send_envelope(Envelope::init(token, hint)).await?;

        loop {
            match self.reader.next_frame().await {
                Ok(Some(env)) => match env.kind {
                    Kind::Accepted => {
                        self.peer_hint = env
                            .idle_timeout
                            .filter(|&ms| ms > 0)
                            .map(Duration::from_millis);
                        self.initialized = true;
                        handler.on_connect(connection).await;
                        return Ok(true);
                    }
                    Kind::Denied => {
                        handler.on_error(SessionError::Authentication(
                            "connection not accepted".to_string(),
                        ));
                        return Ok(false);
                    }
                    kind => {
                        warn!(?kind, "envelope before handshake completion, ignoring");
                    }
                },
                Ok(None) => return Ok(false),
                Err(CodecError::Io(e)) => {
                    debug!(error = %e, "transport error during handshake");
                    return Err(SessionError::Io(e));
                }
                Err(e) => {
                    handler.on_error(SessionError::Codec(e));
                    return Err(SessionError::Handshake(
                        "decode failure during handshake".to_string(),
                    ));
                }
            }
        }
    }

    /// Wait for `init`, suspend on the authorizer's decision, then answer
    /// with `accepted` or `denied`.
    async fn handshake_responder(
        &mut self,
        authorizer: &Arc<dyn Authorizer>,
        connection: &Connection,
    ) -> Result<Option<Arc<dyn SessionHandler>>, SessionError> {
        loop {
            match self.reader.next_frame().await {
                Ok(Some(env)) => match env.kind {
                    Kind::Init => {
                        let token = match env.payload.as_ref().and_then(Value::as_str) {
                            Some(token) => token.to_string(),
                            None => {
                                warn!("init without a token, denying");
                                self.send_envelope(Envelope::denied()).await?;
                                return Ok(None);
                            }
                        };
                        self.peer_hint = env
                            .idle_timeout
                            .filter(|&ms| ms > 0)
                            .map(Duration::from_millis);

                        match authorizer.authorize(connection, &token).await {
                            Some(handler) => {
                                // Acceptance must reach the wire before the
                                // connection counts as initialized: a failed
                                // write here leaves on_connect unfired and
                                // therefore owes no on_close.
                                let hint = self.own_hint.map(|d| d.as_millis() as u64);
                                self.send_envelope(Envelope::accepted(hint)).await?;
                                self.initialized = true;
                                handler.on_connect(connection).await;
                                return Ok(Some(handler));
                            }
                            None => {
                                debug!("authorizer denied connection");
                                self.send_envelope(Envelope::denied()).await?;
                                return Ok(None);
                            }
                        }
                    }
                    kind => {
                        warn!(?kind, "envelope before handshake completion, ignoring");
                    }
                },
                Ok(None) => return Ok(None),
                Err(CodecError::Io(e)) => {
                    debug!(error = %e, "transport error during handshake");
                    return Err(SessionError::Io(e));
                }
                Err(e) => {
                    warn!(error = %e, "decode error during handshake");
                    return Err(SessionError::Codec(e));
                }
            }
        }
    }

    async fn run_main(mut self, handler: Arc<dyn SessionHandler>) {
        // Keepalive runs only when both sides advertised a nonzero interval.
        let keepalive = matches!((self.own_hint, self.peer_hint), (Some(_), Some(_)));
        let hour = Duration::from_secs(3600);
        let own_window = self.own_hint.unwrap_or(hour);
        let peer_window = self.peer_hint.unwrap_or(hour);
        let mut probe = interval((own_window / 3).max(Duration::from_millis(1)));
        let mut liveness = interval((peer_window / 4).max(Duration::from_millis(1)));

        let had_error = loop {
            tokio::select! {
                frame = self.reader.next_frame() => match frame {
                    Ok(Some(env)) => {
                        self.last_rx = Instant::now();
                        if let Err(e) = self.handle_envelope(env, &handler).await {
                            debug!(error = %e, "write failed");
                            break true;
                        }
                    }
                    Ok(None) => break false,
                    Err(CodecError::Io(e)) => {
                        debug!(error = %e, "transport error");
                        break true;
                    }
                    Err(e) => {
                        handler.on_error(SessionError::Codec(e));
                        break true;
                    }
                },
                cmd = self.command_rx.recv() => match cmd {
                    None | Some(Command::Close) => break false,
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd).await {
                            debug!(error = %e, "write failed");
                            break true;
                        }
                    }
                },
                _ = probe.tick(), if keepalive => {
                    if self.last_tx.elapsed() >= own_window * 2 / 3 {
                        if let Err(e) = self.send_envelope(Envelope::ping()).await {
                            debug!(error = %e, "ping failed");
                            break true;
                        }
                    }
                },
                _ = liveness.tick(), if keepalive => {
                    if self.last_rx.elapsed() >= peer_window {
                        warn!("peer liveness window elapsed, closing");
                        break true;
                    }
                },
            }
        };

        self.teardown(had_error, Some(&handler)).await;
    }

    /// Dispatch one post-handshake envelope to the right table entry or to
    /// the handler. Errors here are write failures only.
    async fn handle_envelope(
        &mut self,
        env: Envelope,
        handler: &Arc<dyn SessionHandler>,
    ) -> Result<(), SessionError> {
        match env.kind {
            Kind::Msg => handler.on_message(payload_of(env)).await,

            Kind::Ask => {
                let Some(id) = env.id else {
                    handler.on_error(SessionError::Protocol("ask without id".to_string()));
                    return Ok(());
                };
                let payload = payload_of(env);
                let handler = Arc::clone(handler);
                let commands = self.commands.clone();
                // Answer in a separate task so a slow handler never blocks
                // this connection. If the connection is gone by the time the
                // answer arrives, the command send fails silently.
                tokio::spawn(async move {
                    let result = handler.on_question(payload).await;
                    let _ = commands.send(Command::Answer { id, result });
                });
            }

            Kind::Resp | Kind::RespError => {
                let Some(id) = env.id else {
                    handler.on_error(SessionError::Protocol(
                        "response without id".to_string(),
                    ));
                    return Ok(());
                };
                let is_error = env.kind == Kind::RespError;
                match self.questions.remove(&id) {
                    Some(question) => {
                        question.timer.abort();
                        let outcome = if is_error {
                            Err(AskError::Remote(payload_of(env)))
                        } else {
                            Ok(payload_of(env))
                        };
                        let _ = question.reply.send(outcome);
                    }
                    None => handler.on_error(SessionError::Protocol(format!(
                        "response received for unknown id {id}"
                    ))),
                }
            }

            Kind::Obs => {
                // A value for a consumer that already unsubscribed is an
                // in-flight race, dropped silently.
                if let Some(id) = env.id {
                    if let Some(events) = self.consumers.get(&id) {
                        let _ = events.send(ObserverEvent::Next(payload_of(env)));
                    }
                }
            }

            Kind::ObsComplete => {
                if let Some(id) = env.id {
                    if let Some(events) = self.consumers.remove(&id) {
                        let _ = events.send(ObserverEvent::Complete);
                    }
                }
            }

            Kind::ObsError => {
                if let Some(id) = env.id {
                    if let Some(events) = self.consumers.remove(&id) {
                        let _ = events.send(ObserverEvent::Error(payload_of(env)));
                    }
                }
            }

            Kind::SubscribeObservable => {
                let Some(id) = env.id else {
                    handler.on_error(SessionError::Protocol(
                        "subscribeObservable without id".to_string(),
                    ));
                    return Ok(());
                };
                match handler.on_request_observable(payload_of(env)).await {
                    None => {
                        self.send_envelope(Envelope::obs_error(
                            id,
                            Value::String("cannot create observable".to_string()),
                        ))
                        .await?;
                    }
                    Some(stream) => {
                        let commands = self.commands.clone();
                        let forward = tokio::spawn(async move {
                            let mut stream = stream;
                            while let Some(value) = stream.next().await {
                                if commands.send(Command::Forward { id, value }).is_err() {
                                    return;
                                }
                            }
                            let _ = commands.send(Command::ForwardComplete(id));
                        });
                        let producer = StreamProducer {
                            forward: forward.abort_handle(),
                        };
                        if let Some(previous) = self.producers.insert(id, producer) {
                            previous.forward.abort();
                            handler.on_error(SessionError::Protocol(format!(
                                "duplicate subscription id {id}"
                            )));
                        }
                    }
                }
            }

            Kind::CancelObservable => {
                // A missing entry means the sequence completed concurrently
                // with the cancellation; not an error.
                if let Some(id) = env.id {
                    if let Some(producer) = self.producers.remove(&id) {
                        producer.forward.abort();
                    }
                }
            }

            // The receive clock was already updated; nothing else to do.
            Kind::Ping => {}

            Kind::Init | Kind::Accepted | Kind::Denied => {
                handler.on_error(SessionError::Protocol(format!(
                    "handshake envelope {:?} after initialization",
                    env.kind
                )));
            }
        }
        Ok(())
    }

    /// Execute one command from a handle or helper task. Errors here are
    /// write failures only.
    async fn handle_command(&mut self, cmd: Command) -> Result<(), SessionError> {
        match cmd {
            Command::SendMessage(payload) => {
                self.send_envelope(Envelope::msg(payload)).await?;
            }

            Command::Ask {
                payload,
                timeout,
                reply,
            } => {
                let id = self.next_question_id;
                self.next_question_id += 1;
                let commands = self.commands.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = commands.send(Command::AskDeadline(id));
                })
                .abort_handle();
                self.questions.insert(id, PendingQuestion { reply, timer });
                self.send_envelope(Envelope::ask(id, payload)).await?;
            }

            Command::AskDeadline(id) => {
                // First terminal event wins; a deadline for an already
                // resolved question finds no entry.
                if let Some(question) = self.questions.remove(&id) {
                    let _ = question.reply.send(Err(AskError::Timeout));
                }
            }

            Command::Subscribe {
                params,
                events,
                reply,
            } => {
                let id = self.next_sequence_id;
                self.next_sequence_id += 1;
                self.consumers.insert(id, events);
                let _ = reply.send(id);
                self.send_envelope(Envelope::subscribe_observable(id, params))
                    .await?;
            }

            Command::Unsubscribe(id) => {
                if self.consumers.remove(&id).is_some() {
                    self.send_envelope(Envelope::cancel_observable(id)).await?;
                }
            }

            Command::Answer { id, result } => {
                let env = match result {
                    Ok(value) => Envelope::resp(id, value),
                    Err(reason) => Envelope::resp_error(id, reason),
                };
                self.send_envelope(env).await?;
            }

            Command::Forward { id, value } => {
                // Skip values from a producer the peer already cancelled.
                if self.producers.contains_key(&id) {
                    self.send_envelope(Envelope::obs(id, value)).await?;
                }
            }

            Command::ForwardComplete(id) => {
                if self.producers.remove(&id).is_some() {
                    self.send_envelope(Envelope::obs_complete(id)).await?;
                }
            }

            Command::Stats(reply) => {
                let _ = reply.send(ConnectionStats {
                    pending_questions: self.questions.len(),
                    consumers: self.consumers.len(),
                    producers: self.producers.len(),
                });
            }

            // Handled by the main loop.
            Command::Close => {}
        }
        Ok(())
    }

    async fn send_envelope(&mut self, env: Envelope) -> Result<(), SessionError> {
        let bytes = encode(&env)?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.last_tx = Instant::now();
        Ok(())
    }

    /// Tear down all per-connection state. Runs exactly once, on every exit
    /// path: questions reject with `Closed`, consumers complete, producers
    /// stop without further sends.
    async fn teardown(mut self, had_error: bool, handler: Option<&Arc<dyn SessionHandler>>) {
        for (_, question) in self.questions.drain() {
            question.timer.abort();
            let _ = question.reply.send(Err(AskError::Closed));
        }
        for (_, events) in self.consumers.drain() {
            let _ = events.send(ObserverEvent::Complete);
        }
        for (_, producer) in self.producers.drain() {
            producer.forward.abort();
        }
        if self.initialized {
            if let Some(handler) = handler {
                handler.on_close(had_error).await;
            }
        }
        debug!(had_error, "connection torn down");
    }
}

fn payload_of(env: Envelope) -> Value {
    env.payload.unwrap_or(Value::Null)
}
