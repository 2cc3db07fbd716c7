//! Client connection lifecycle.
//!
//! A [`Client`] owns one logical connection to a relay server and keeps
//! it alive: it performs the `Connected` handshake, answers heartbeat
//! probes, sends its own probes when the line goes quiet, and
//! re-establishes the socket with fixed backoff when it drops. Requests
//! pending on a lost socket are rejected immediately; they never
//! carry over to the next socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};

use relaymesh_protocol::{
    MSG_BEAT, MSG_CONNECTED, Message, PeerId, is_response_type,
};
use relaymesh_router::{
    MessageSink, PendingTable, ReplyContext, Router, send_and_await,
};
use relaymesh_session::CookieJar;
use relaymesh_transfer::{TransferEngine, TransferEvent};
use relaymesh_transport::{ClientConnection, Connection, ConnectionId};

use crate::config::ClientConfig;
use crate::error::RelayError;
use crate::wire;

/// Where the connection currently stands.
///
/// `Disconnected → Connecting → Open → (Closing | Faulted)`; a
/// `Faulted` connection re-enters `Connecting` on each reconnect
/// attempt, and the client settles back in `Disconnected` once
/// supervision ends (explicit close, reconnect disabled, or the retry
/// budget spent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no reconnect in progress.
    Disconnected,
    /// A connect or reconnect attempt is running.
    Connecting,
    /// Handshake complete; traffic flows.
    Open,
    /// The user asked to close; teardown in progress.
    Closing,
    /// The connection dropped; reconnect attempts are pending.
    Faulted,
}

struct Active {
    peer_id: PeerId,
    conn: Arc<ClientConnection>,
    sink: MessageSink,
    pending: Arc<PendingTable>,
    engine: Arc<TransferEngine>,
}

struct ClientInner {
    url: String,
    config: ClientConfig,
    router: Arc<Router>,
    state: Mutex<ConnectionState>,
    active: Mutex<Option<Active>>,
    last_activity: Mutex<Instant>,
    lost: Notify,
    closed: AtomicBool,
    transfer_events: mpsc::UnboundedSender<TransferEvent>,
    session_cookie: Mutex<Option<CookieJar>>,
}

/// A lifecycle-managed connection to a relay server.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects to `url`, completes the handshake, and starts the
    /// heartbeat and reconnect supervision tasks.
    ///
    /// The returned receiver carries transfer events for both
    /// directions.
    pub async fn connect(
        url: impl Into<String>,
        config: ClientConfig,
        router: Arc<Router>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransferEvent>), RelayError>
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            url: url.into(),
            config,
            router,
            state: Mutex::new(ConnectionState::Disconnected),
            active: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            lost: Notify::new(),
            closed: AtomicBool::new(false),
            transfer_events: events_tx,
            session_cookie: Mutex::new(None),
        });

        establish(&inner).await?;
        tokio::spawn(supervise(inner.clone()));
        tokio::spawn(heartbeat(inner.clone()));
        Ok((Self { inner }, events_rx))
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// The peer id the server assigned, while a connection is open.
    pub fn peer_id(&self) -> Option<PeerId> {
        let active = self.inner.active.lock().expect("active lock");
        active.as_ref().map(|a| a.peer_id.clone())
    }

    /// The session cookie the server attached to the handshake, if any.
    pub fn session_cookie(&self) -> Option<CookieJar> {
        self.inner.session_cookie.lock().expect("cookie lock").clone()
    }

    /// Queues a message on the open connection.
    pub fn send(&self, msg: Message) -> Result<(), RelayError> {
        let sink = {
            let active = self.inner.active.lock().expect("active lock");
            active.as_ref().map(|a| a.sink.clone())
        }
        .ok_or(RelayError::NotConnected)?;
        sink.send(msg)?;
        Ok(())
    }

    /// Sends a message and waits for its correlated reply, bounded by
    /// the configured reply timeout.
    pub async fn send_and_await(
        &self,
        msg: Message,
    ) -> Result<Message, RelayError> {
        let (sink, pending) = {
            let active = self.inner.active.lock().expect("active lock");
            active
                .as_ref()
                .map(|a| (a.sink.clone(), a.pending.clone()))
        }
        .ok_or(RelayError::NotConnected)?;
        let reply = send_and_await(
            &sink,
            &pending,
            msg,
            self.inner.config.reply_timeout,
        )
        .await?;
        Ok(reply)
    }

    /// Starts sending a file to the connected peer; progress arrives on
    /// the transfer event stream. Returns the transfer id.
    pub fn send_file(
        &self,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<String, RelayError> {
        let engine = {
            let active = self.inner.active.lock().expect("active lock");
            active.as_ref().map(|a| a.engine.clone())
        }
        .ok_or(RelayError::NotConnected)?;
        Ok(engine.send_file(name, None, data)?)
    }

    /// Closes the connection and stops supervision. Outstanding
    /// requests and transfers are rejected.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Closing);
        let active = self.inner.active.lock().expect("active lock").take();
        if let Some(active) = active {
            let _ = active.conn.close().await;
            active.pending.reject_all();
            active.engine.abort_all();
        }
        // Wake the supervisor so it observes the closed flag and exits.
        self.inner.lost.notify_one();
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("client closed");
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock")
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("state lock");
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("activity lock") = Instant::now();
    }

    /// Tears down the active connection when it matches `id`. Safe to
    /// call from any task; acts at most once per connection.
    fn on_connection_lost(&self, id: ConnectionId) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let taken = {
            let mut active = self.active.lock().expect("active lock");
            match active.as_ref() {
                Some(a) if a.conn.id() == id => active.take(),
                _ => return,
            }
        };
        if let Some(active) = taken {
            active.pending.reject_all();
            active.engine.abort_all();
        }
        tracing::warn!(%id, "connection lost");
        self.set_state(ConnectionState::Faulted);
        self.lost.notify_one();
    }
}

/// Dials, handshakes, and installs a fresh connection.
async fn establish(inner: &Arc<ClientInner>) -> Result<(), RelayError> {
    inner.set_state(ConnectionState::Connecting);
    let conn = Arc::new(relaymesh_transport::connect(&inner.url).await?);

    let (sink, out_rx) = MessageSink::channel();
    let pending = Arc::new(PendingTable::new());
    let (engine, mut engine_events) = TransferEngine::new(
        sink.clone(),
        pending.clone(),
        inner.config.chunk_size,
        inner.config.transfer_ack_timeout,
    );

    tokio::spawn(wire::writer_loop(conn.clone(), out_rx));
    {
        let tx = inner.transfer_events.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_events.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(reader_loop(
        inner.clone(),
        conn.clone(),
        sink.clone(),
        pending.clone(),
        engine.clone(),
        ready_tx,
    ));

    let peer_id =
        match tokio::time::timeout(inner.config.reply_timeout, ready_rx).await
        {
            Ok(Ok(peer_id)) => peer_id,
            _ => {
                let _ = conn.close().await;
                inner.set_state(ConnectionState::Faulted);
                return Err(RelayError::HandshakeTimeout);
            }
        };

    tracing::info!(%peer_id, url = %inner.url, "connected");
    {
        let mut active = inner.active.lock().expect("active lock");
        *active = Some(Active {
            peer_id,
            conn,
            sink,
            pending,
            engine,
        });
    }
    inner.touch();
    inner.set_state(ConnectionState::Open);
    Ok(())
}

async fn reader_loop(
    inner: Arc<ClientInner>,
    conn: Arc<ClientConnection>,
    sink: MessageSink,
    pending: Arc<PendingTable>,
    engine: Arc<TransferEngine>,
    ready: oneshot::Sender<PeerId>,
) {
    let ctx = ReplyContext::new(sink);
    let mut ready = Some(ready);
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                inner.touch();
                match wire::decode(&frame) {
                    Ok((msg, payload)) => on_message(
                        &inner, msg, payload, &pending, &engine, &ctx,
                        &mut ready,
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, "inbound frame rejected");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "connection read failed");
                break;
            }
        }
    }
    pending.reject_all();
    engine.abort_all();
    inner.on_connection_lost(conn.id());
}

fn on_message(
    inner: &ClientInner,
    msg: Message,
    payload: Option<Vec<u8>>,
    pending: &PendingTable,
    engine: &TransferEngine,
    ctx: &ReplyContext,
    ready: &mut Option<oneshot::Sender<PeerId>>,
) {
    if msg.kind == MSG_CONNECTED {
        // Bare string data is just the id; an object adds the session
        // cookie.
        let peer_id = match msg.data.as_str() {
            Some(id) => PeerId::from(id),
            None => PeerId::from(
                msg.data
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            ),
        };
        if let Some(raw) = msg.data.get("cookie").and_then(Value::as_str) {
            match CookieJar::parse(raw) {
                Ok(jar) => {
                    *inner.session_cookie.lock().expect("cookie lock") =
                        Some(jar);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "handshake cookie unreadable");
                }
            }
        }
        if let Some(tx) = ready.take() {
            let _ = tx.send(peer_id);
        } else {
            tracing::debug!(%peer_id, "duplicate handshake message ignored");
        }
        return;
    }
    if msg.kind == MSG_BEAT {
        ctx.reply(&msg, Value::Null);
        return;
    }
    if pending.try_resolve(&msg) {
        return;
    }
    if engine.handle_message(&msg, payload.as_deref()) {
        return;
    }
    if is_response_type(&msg.kind) {
        tracing::debug!(kind = %msg.kind, "late reply dropped");
        return;
    }
    if inner.router.dispatch(&msg, ctx) == 0 {
        tracing::warn!(kind = %msg.kind, "no handler for message");
    }
}

/// Re-establishes the connection after a loss, with fixed backoff and
/// a bounded number of attempts per outage.
async fn supervise(inner: Arc<ClientInner>) {
    loop {
        inner.lost.notified().await;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if !inner.config.auto_reconnect {
            tracing::info!("auto-reconnect disabled, staying disconnected");
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tokio::time::sleep(inner.config.backoff).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            tracing::info!(attempt, url = %inner.url, "reconnecting");
            match establish(&inner).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect failed");
                    if attempt >= inner.config.retry_limit {
                        tracing::error!(
                            attempts = attempt,
                            "reconnect attempts exhausted"
                        );
                        inner.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    inner.set_state(ConnectionState::Faulted);
                }
            }
        }
    }
}

/// Sends a heartbeat probe when the line has been quiet too long, and
/// drops the connection when the probe goes unanswered.
async fn heartbeat(inner: Arc<ClientInner>) {
    let mut ticker = tokio::time::interval(inner.config.beat_check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if inner.state() == ConnectionState::Disconnected {
            // Supervision is over; no socket will come back.
            return;
        }
        if inner.state() != ConnectionState::Open {
            continue;
        }
        let idle =
            inner.last_activity.lock().expect("activity lock").elapsed();
        if idle < inner.config.idle_threshold {
            continue;
        }

        let Some((sink, pending, conn)) = ({
            let active = inner.active.lock().expect("active lock");
            active
                .as_ref()
                .map(|a| (a.sink.clone(), a.pending.clone(), a.conn.clone()))
        }) else {
            continue;
        };

        tracing::debug!(idle_secs = idle.as_secs(), "sending heartbeat");
        let beat = Message::new(MSG_BEAT, Value::Null);
        match send_and_await(
            &sink,
            &pending,
            beat,
            inner.config.beat_reply_timeout,
        )
        .await
        {
            Ok(_) => inner.touch(),
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat unanswered, dropping connection");
                let _ = conn.close().await;
                inner.on_connection_lost(conn.id());
            }
        }
    }
}
