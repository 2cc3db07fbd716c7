//! Per-connection server logic.
//!
//! Each accepted connection gets its own peer id, outbound queue,
//! pending table, and transfer engine. The reader task classifies every
//! inbound message in a fixed order:
//!
//! 1. relay, when the message names recipients;
//! 2. heartbeat probes, answered locally;
//! 3. the pending table (replies to server-initiated requests);
//! 4. the transfer engine (the whole file family);
//! 5. registered handlers, with a warning when none match.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use relaymesh_protocol::{
    MSG_BEAT, MSG_CONNECTED, Message, PeerId, is_response_type,
};
use relaymesh_router::{
    MessageSink, Outbound, PendingTable, ReplyContext, Router,
};
use relaymesh_transfer::{TransferEngine, TransferEvent};
use relaymesh_transport::{Connection, RawFrame, ServerConnection};

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::wire;

/// State shared by the accept loop and every connection task.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) router: Arc<Router>,
    pub(crate) transfer_events: mpsc::UnboundedSender<(PeerId, TransferEvent)>,
}

/// Runs one accepted connection to completion.
pub(crate) async fn handle_connection(
    state: Arc<ServerState>,
    conn: ServerConnection,
) {
    let peer_id = relaymesh_session::peer_id();
    let conn = Arc::new(conn);
    let (sink, out_rx) = MessageSink::channel();
    let pending = Arc::new(PendingTable::new());
    let (engine, mut engine_events) = TransferEngine::new(
        sink.clone(),
        pending.clone(),
        state.config.chunk_size,
        state.config.transfer_ack_timeout,
    );

    let writer = tokio::spawn(wire::writer_loop(conn.clone(), out_rx));
    let forwarder = {
        let tx = state.transfer_events.clone();
        let pid = peer_id.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_events.recv().await {
                if tx.send((pid.clone(), event)).is_err() {
                    break;
                }
            }
        })
    };

    state
        .registry
        .register(peer_id.clone(), sink.clone(), engine.clone());
    let ctx = ReplyContext::new(sink.clone());

    // Handshake: hand the peer its assigned id, plus the session
    // cookie when one is configured.
    let hello = match &state.config.session_cookie {
        Some(jar) if !jar.is_empty() => json!({
            "id": peer_id.as_str(),
            "cookie": jar.encode(),
        }),
        _ => json!(peer_id.as_str()),
    };
    if sink.send(Message::new(MSG_CONNECTED, hello)).is_err() {
        state.registry.unregister(&peer_id);
        writer.abort();
        forwarder.abort();
        return;
    }
    tracing::info!(%peer_id, remote = ?conn.remote_addr(), "peer connected");

    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                if let Err(e) =
                    process_frame(&state, &peer_id, &frame, &pending, &engine, &ctx)
                {
                    tracing::warn!(%peer_id, error = %e, "inbound frame rejected");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%peer_id, error = %e, "connection read failed");
                break;
            }
        }
    }

    tracing::info!(%peer_id, "peer disconnected");
    state.registry.unregister(&peer_id);
    pending.reject_all();
    engine.abort_all();
    writer.abort();
    forwarder.abort();
}

fn process_frame(
    state: &ServerState,
    peer_id: &PeerId,
    frame: &RawFrame,
    pending: &PendingTable,
    engine: &TransferEngine,
    ctx: &ReplyContext,
) -> Result<(), RelayError> {
    let (mut msg, payload) = wire::decode(frame)?;
    // The origin stamp is ours to apply; whatever the sender wrote
    // there is discarded.
    msg.from_peer = Some(peer_id.clone());

    if !msg.to_recipients.is_empty() {
        let recipients = std::mem::take(&mut msg.to_recipients);
        tracing::debug!(
            %peer_id,
            kind = %msg.kind,
            recipients = recipients.len(),
            "relaying"
        );
        let item = match payload {
            Some(payload) => Outbound::Frame {
                payload,
                metadata: msg,
            },
            None => Outbound::Message(msg),
        };
        let report = state.registry.multicast(&recipients, item);
        for (peer, err) in &report.failed {
            tracing::warn!(%peer, error = %err, "relay failed");
        }
        return Ok(());
    }

    if msg.kind == MSG_BEAT {
        ctx.reply(&msg, Value::Null);
        return Ok(());
    }
    if pending.try_resolve(&msg) {
        return Ok(());
    }
    if engine.handle_message(&msg, payload.as_deref()) {
        return Ok(());
    }
    if is_response_type(&msg.kind) {
        tracing::debug!(kind = %msg.kind, "late reply dropped");
        return Ok(());
    }
    if state.router.dispatch(&msg, ctx) == 0 {
        tracing::warn!(%peer_id, kind = %msg.kind, "no handler for message");
    }
    Ok(())
}
