//! Handler registration and message dispatch.
//!
//! Handlers are registered explicitly with a type filter and invoked
//! synchronously on the connection's reader task. Replies go through a
//! [`MessageSink`], an unbounded queue drained by the connection's
//! writer task, so handlers never block on the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use relaymesh_protocol::{Message, response_type};

use crate::correlation::PendingTable;
use crate::error::CorrelationError;

// ============================================================
// Outbound queue
// ============================================================

/// One item on the outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A JSON message, sent as a text frame.
    Message(Message),
    /// A binary envelope: payload plus metadata, framed by the codec.
    Frame {
        /// Raw payload bytes.
        payload: Vec<u8>,
        /// Metadata message appended after the payload.
        metadata: Message,
    },
}

/// Cloneable handle for queueing outbound traffic on a connection.
#[derive(Clone)]
pub struct MessageSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl MessageSink {
    /// Creates a sink and the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a JSON message.
    pub fn send(&self, msg: Message) -> Result<(), CorrelationError> {
        self.tx
            .send(Outbound::Message(msg))
            .map_err(|_| CorrelationError::SinkClosed)
    }

    /// Queues a binary envelope.
    pub fn send_frame(
        &self,
        payload: Vec<u8>,
        metadata: Message,
    ) -> Result<(), CorrelationError> {
        self.tx
            .send(Outbound::Frame { payload, metadata })
            .map_err(|_| CorrelationError::SinkClosed)
    }

    /// Returns `true` when the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================
// Handlers
// ============================================================

/// Reacts to inbound messages on a connection.
pub trait Handler: Send + Sync {
    /// Called for each inbound message matching the handler's filter.
    fn on_message(&self, msg: &Message, ctx: &ReplyContext);
}

impl<F> Handler for F
where
    F: Fn(&Message, &ReplyContext) + Send + Sync,
{
    fn on_message(&self, msg: &Message, ctx: &ReplyContext) {
        self(msg, ctx)
    }
}

/// Token returned by [`Router::register`]; passes to
/// [`Router::unregister`] to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Context handed to handlers for sending replies.
pub struct ReplyContext {
    sink: MessageSink,
}

impl ReplyContext {
    /// Wraps a sink in a reply context.
    pub fn new(sink: MessageSink) -> Self {
        Self { sink }
    }

    /// Queues an arbitrary message on the connection.
    pub fn send(&self, msg: Message) {
        if self.sink.send(msg).is_err() {
            tracing::debug!("reply dropped, sink closed");
        }
    }

    /// Replies to `to` with a success payload.
    ///
    /// The reply's type is `to.reply_type()`, it echoes `to`'s message
    /// id, and it is addressed back to `to`'s sender.
    pub fn reply(&self, to: &Message, data: Value) {
        self.send(to.reply_with(data));
    }

    /// Replies to `to` with an exception payload.
    pub fn reply_exception(&self, to: &Message, exception: Value) {
        self.send(to.reply_with_exception(exception));
    }

    /// The underlying sink, for handlers that need to hold a handle.
    pub fn sink(&self) -> &MessageSink {
        &self.sink
    }
}

struct Registration {
    id: HandlerId,
    filter: Vec<String>,
    handler: Arc<dyn Handler>,
}

impl Registration {
    fn matches(&self, kind: &str) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|t| t == kind)
    }
}

// ============================================================
// Router
// ============================================================

/// Dispatches inbound messages to registered handlers.
#[derive(Default)]
pub struct Router {
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the message types in `filter`.
    ///
    /// An empty filter subscribes the handler to every type.
    pub fn register<H>(&self, filter: &[&str], handler: H) -> HandlerId
    where
        H: Handler + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock().expect("router lock");
        handlers.push(Registration {
            id,
            filter: filter.iter().map(|s| s.to_string()).collect(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a handler. Returns `true` when it was still registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().expect("router lock");
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Invokes every handler whose filter matches `msg`.
    ///
    /// Returns the number of handlers invoked. Handlers run outside
    /// the registry lock, so a handler may register or unregister
    /// others.
    pub fn dispatch(&self, msg: &Message, ctx: &ReplyContext) -> usize {
        let matching: Vec<Arc<dyn Handler>> = {
            let handlers = self.handlers.lock().expect("router lock");
            handlers
                .iter()
                .filter(|r| r.matches(&msg.kind))
                .map(|r| r.handler.clone())
                .collect()
        };
        for handler in &matching {
            handler.on_message(msg, ctx);
        }
        matching.len()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().expect("router lock").len()
    }

    /// Returns `true` when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================
// Request/reply
// ============================================================

/// Sends `msg` and waits for its correlated reply.
///
/// Assigns a message id when the caller did not, marks the message as
/// awaiting a reply, and registers the expectation before queueing the
/// send so a fast reply cannot slip past the table. The expected reply
/// type is `msg.reply_to_type` when set, otherwise `<type>_Response`.
pub async fn send_and_await(
    sink: &MessageSink,
    pending: &PendingTable,
    mut msg: Message,
    timeout: Duration,
) -> Result<Message, CorrelationError> {
    let id = msg
        .message_id
        .get_or_insert_with(relaymesh_session::message_id)
        .clone();
    msg.await_reply = true;
    let reply_type = msg
        .reply_to_type
        .clone()
        .unwrap_or_else(|| response_type(&msg.kind));

    let reply = pending.register(&id, &msg.kind, &reply_type);
    if let Err(e) = sink.send(msg) {
        pending.cancel(&id);
        return Err(e);
    }
    reply.wait(timeout).await
}
