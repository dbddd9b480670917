//! Consumer-side observable handles.
//!
//! [`ObservableRequest`] is cold: creating one sends nothing. Traffic starts
//! when [`subscribe`](ObservableRequest::subscribe) registers a consumer and
//! emits the `subscribeObservable` envelope. Dropping the resulting
//! [`ObservableStream`] before its terminal event cancels the subscription
//! with exactly one `cancelObservable` — unless the connection already
//! closed, in which case nothing is sent.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::Command;
use crate::error::{SessionError, SubscribeError};

/// Terminal and non-terminal events delivered to a registered consumer.
#[derive(Debug)]
pub(crate) enum ObserverEvent {
    Next(Value),
    Complete,
    Error(Value),
}

/// A lazily-activated request for a peer-produced sequence.
pub struct ObservableRequest {
    commands: mpsc::UnboundedSender<Command>,
    params: Value,
}

impl ObservableRequest {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, params: Value) -> Self {
        Self { commands, params }
    }

    /// Begin consuming: register a local consumer, send
    /// `subscribeObservable`, and return the value stream.
    pub async fn subscribe(self) -> Result<ObservableStream, SessionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                params: self.params,
                events: events_tx,
                reply: id_tx,
            })
            .map_err(|_| SessionError::Closed)?;
        let id = id_rx.await.map_err(|_| SessionError::Closed)?;
        Ok(ObservableStream {
            events: events_rx,
            commands: self.commands,
            id,
            done: false,
        })
    }
}

/// A peer-produced sequence of values ending in exactly one terminal event:
/// natural completion (stream end), a remote error, or implicit completion
/// when the connection closes.
pub struct ObservableStream {
    events: mpsc::UnboundedReceiver<ObserverEvent>,
    commands: mpsc::UnboundedSender<Command>,
    id: u64,
    done: bool,
}

impl ObservableStream {
    /// Local sequence id of this subscription.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for ObservableStream {
    type Item = Result<Value, SubscribeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(ObserverEvent::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(ObserverEvent::Error(reason))) => {
                self.done = true;
                Poll::Ready(Some(Err(SubscribeError::Remote(reason))))
            }
            // Channel closure means the connection tore down: implicit completion.
            Poll::Ready(Some(ObserverEvent::Complete)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ObservableStream {
    fn drop(&mut self) {
        // Unsubscribe only if no terminal was observed. The connection task
        // sends `cancelObservable` only while the entry is still registered,
        // and the send is skipped entirely once the connection is gone.
        if !self.done {
            let _ = self.commands.send(Command::Unsubscribe(self.id));
        }
    }
}
