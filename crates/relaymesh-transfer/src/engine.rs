//! The transfer engine.
//!
//! One engine rides each connection and owns both directions:
//!
//! - **Sending** — [`TransferEngine::send_file`] reserves the
//!   connection's single outbound transfer slot and spawns a driver
//!   task that walks the protocol linearly: announce metadata, stream
//!   chunks one acknowledgement at a time, claim completion, and
//!   resume from the receiver's retry point when verification finds a
//!   gap.
//! - **Receiving** — [`TransferEngine::handle_message`] consumes every
//!   message of the file family off the reader task, reassembling
//!   chunks into a [`ReceiveSession`] and emitting a
//!   [`TransferEvent::Received`] once the merge verifies.
//!
//! The metadata announcement is the only correlated exchange (its
//! reply arrives as `FileReady`); per-chunk acknowledgements flow over
//! an internal channel to the driver task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use relaymesh_protocol::{
    MSG_FILE_CHUNK, MSG_FILE_COMPLETE, MSG_FILE_FINISH, MSG_FILE_META,
    MSG_FILE_READY, MSG_FILE_RETRY, Message, PeerId, is_file_message,
};
use relaymesh_router::{MessageSink, PendingTable, send_and_await};

use crate::error::TransferError;
use crate::session::{ReceiveSession, TransferMeta};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Default patience for each acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================
// Wire payloads
// ============================================================

/// `{transferId, index}` payload used by ready, chunk, and retry
/// messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRef {
    transfer_id: String,
    index: u64,
}

/// `{transferId}` payload used by complete and finish messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRef {
    transfer_id: String,
}

// ============================================================
// Events
// ============================================================

/// Notifications the engine emits to the application.
///
/// Progress is reported in bytes; percent is
/// `transferred as f64 / total as f64`.
#[derive(Debug)]
pub enum TransferEvent {
    /// Another chunk went out.
    SendProgress {
        /// The transfer this progress belongs to.
        transfer_id: String,
        /// Bytes sent so far.
        sent_bytes: u64,
        /// Total payload size.
        total_bytes: u64,
    },
    /// Another chunk arrived.
    ReceiveProgress {
        /// The transfer this progress belongs to.
        transfer_id: String,
        /// Bytes stored so far.
        received_bytes: u64,
        /// Total payload size.
        total_bytes: u64,
    },
    /// A transfer finished arriving and verified; here is the payload.
    Received {
        /// The completed transfer's id.
        transfer_id: String,
        /// File name announced in the metadata.
        name: String,
        /// MIME type announced in the metadata, when present.
        content_type: Option<String>,
        /// The reassembled payload.
        data: Vec<u8>,
    },
    /// An outbound transfer was acknowledged end-to-end.
    SendCompleted {
        /// The completed transfer's id.
        transfer_id: String,
    },
    /// A transfer died mid-flight.
    Failed {
        /// The failed transfer's id.
        transfer_id: String,
        /// Human-readable cause.
        reason: String,
    },
}

/// Acknowledgement signals routed from the reader task to the send
/// driver.
#[derive(Debug)]
enum AckSignal {
    Ready { index: u64 },
    Retry { index: u64 },
    Finish,
    Abort,
}

struct ActiveSend {
    transfer_id: String,
    acks: mpsc::UnboundedSender<AckSignal>,
}

// ============================================================
// Engine
// ============================================================

/// Per-connection file-transfer state machine.
pub struct TransferEngine {
    sink: MessageSink,
    pending: Arc<PendingTable>,
    chunk_size: u32,
    ack_timeout: Duration,
    // One outbound transfer at a time per connection.
    send_slot: Mutex<Option<ActiveSend>>,
    receives: Mutex<HashMap<String, ReceiveSession>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferEngine {
    /// Creates an engine bound to a connection's sink and pending
    /// table, returning it with the event stream it feeds.
    pub fn new(
        sink: MessageSink,
        pending: Arc<PendingTable>,
        chunk_size: u32,
        ack_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            sink,
            pending,
            chunk_size,
            ack_timeout,
            send_slot: Mutex::new(None),
            receives: Mutex::new(HashMap::new()),
            events,
        });
        (engine, events_rx)
    }

    /// Starts sending `data` to the connected peer.
    ///
    /// Returns the transfer id immediately; progress and completion
    /// arrive as [`TransferEvent`]s. Fails with
    /// [`TransferError::TransferInProgress`] while a previous outbound
    /// transfer is still running.
    pub fn send_file(
        self: &Arc<Self>,
        name: impl Into<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<String, TransferError> {
        let transfer_id = relaymesh_session::transfer_id();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        {
            let mut slot = self.send_slot.lock().expect("send slot lock");
            if slot.is_some() {
                return Err(TransferError::TransferInProgress);
            }
            *slot = Some(ActiveSend {
                transfer_id: transfer_id.clone(),
                acks: ack_tx,
            });
        }

        let engine = self.clone();
        let name = name.into();
        let id = transfer_id.clone();
        tokio::spawn(async move {
            let result = engine
                .run_send(&id, &name, content_type, &data, ack_rx)
                .await;
            engine.release_send_slot(&id);
            match result {
                Ok(()) => {
                    tracing::info!(transfer_id = %id, "transfer sent");
                    engine.emit(TransferEvent::SendCompleted {
                        transfer_id: id,
                    });
                }
                Err(e) => {
                    tracing::warn!(transfer_id = %id, error = %e, "transfer failed");
                    engine.emit(TransferEvent::Failed {
                        transfer_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(transfer_id)
    }

    /// Linear send driver: meta, chunks, completion claim, and the
    /// retry loop verification may send it back into.
    async fn run_send(
        &self,
        transfer_id: &str,
        name: &str,
        content_type: Option<String>,
        data: &[u8],
        mut acks: mpsc::UnboundedReceiver<AckSignal>,
    ) -> Result<(), TransferError> {
        let meta = TransferMeta {
            transfer_id: transfer_id.to_string(),
            name: name.to_string(),
            content_type,
            size: data.len() as u64,
            chunk_size: self.chunk_size,
        };
        let total = meta.chunk_count();

        // The metadata exchange is correlated: the receiver's first
        // FileReady echoes our message id and carries the start index.
        let mut announce =
            Message::new(MSG_FILE_META, serde_json::to_value(&meta)?);
        announce.reply_to_type = Some(MSG_FILE_READY.to_string());
        let ready = send_and_await(
            &self.sink,
            &self.pending,
            announce,
            self.ack_timeout,
        )
        .await?;

        let mut index = serde_json::from_value::<ChunkRef>(ready.data.clone())
            .map(|r| r.index)
            .unwrap_or(0);

        loop {
            if index >= total {
                self.sink.send(Message::new(
                    MSG_FILE_COMPLETE,
                    json!(TransferRef {
                        transfer_id: transfer_id.to_string()
                    }),
                ))?;
                match self.next_ack(transfer_id, &mut acks).await? {
                    AckSignal::Finish => return Ok(()),
                    AckSignal::Retry { index: resume } => {
                        tracing::debug!(
                            transfer_id,
                            resume,
                            "receiver reported a gap, resuming"
                        );
                        index = resume;
                        continue;
                    }
                    // A stale chunk ack; re-claim completion.
                    AckSignal::Ready { .. } => continue,
                    AckSignal::Abort => {
                        return Err(TransferError::Aborted(
                            transfer_id.to_string(),
                        ));
                    }
                }
            }

            let start = (index * self.chunk_size as u64) as usize;
            let end = (start + self.chunk_size as usize).min(data.len());
            self.sink.send_frame(
                data[start..end].to_vec(),
                Message::new(
                    MSG_FILE_CHUNK,
                    json!(ChunkRef {
                        transfer_id: transfer_id.to_string(),
                        index,
                    }),
                ),
            )?;
            self.emit(TransferEvent::SendProgress {
                transfer_id: transfer_id.to_string(),
                sent_bytes: end as u64,
                total_bytes: data.len() as u64,
            });

            match self.next_ack(transfer_id, &mut acks).await? {
                AckSignal::Ready { index: next }
                | AckSignal::Retry { index: next } => index = next,
                AckSignal::Finish => return Ok(()),
                AckSignal::Abort => {
                    return Err(TransferError::Aborted(
                        transfer_id.to_string(),
                    ));
                }
            }
        }
    }

    async fn next_ack(
        &self,
        transfer_id: &str,
        acks: &mut mpsc::UnboundedReceiver<AckSignal>,
    ) -> Result<AckSignal, TransferError> {
        match tokio::time::timeout(self.ack_timeout, acks.recv()).await {
            Ok(Some(signal)) => Ok(signal),
            Ok(None) => Err(TransferError::Aborted(transfer_id.to_string())),
            Err(_) => {
                Err(TransferError::TransferTimeout(transfer_id.to_string()))
            }
        }
    }

    /// Offers an inbound message to the engine.
    ///
    /// Returns `true` when the message belongs to the file family and
    /// was consumed; such messages never reach user handlers. Binary
    /// chunk frames arrive with their `payload`.
    pub fn handle_message(
        &self,
        msg: &Message,
        payload: Option<&[u8]>,
    ) -> bool {
        if !is_file_message(&msg.kind) {
            return false;
        }
        if let Err(e) = self.process(msg, payload) {
            tracing::warn!(kind = %msg.kind, error = %e, "transfer message rejected");
        }
        true
    }

    fn process(
        &self,
        msg: &Message,
        payload: Option<&[u8]>,
    ) -> Result<(), TransferError> {
        match msg.kind.as_str() {
            MSG_FILE_META => self.on_meta(msg),
            MSG_FILE_CHUNK => self.on_chunk(msg, payload.unwrap_or_default()),
            MSG_FILE_COMPLETE => self.on_complete(msg),
            MSG_FILE_READY => {
                let chunk: ChunkRef =
                    serde_json::from_value(msg.data.clone())?;
                self.route_ack(
                    &chunk.transfer_id,
                    AckSignal::Ready { index: chunk.index },
                );
                Ok(())
            }
            MSG_FILE_RETRY => {
                let chunk: ChunkRef =
                    serde_json::from_value(msg.data.clone())?;
                self.route_ack(
                    &chunk.transfer_id,
                    AckSignal::Retry { index: chunk.index },
                );
                Ok(())
            }
            MSG_FILE_FINISH => {
                let tref: TransferRef =
                    serde_json::from_value(msg.data.clone())?;
                self.route_ack(&tref.transfer_id, AckSignal::Finish);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_meta(&self, msg: &Message) -> Result<(), TransferError> {
        let meta: TransferMeta = serde_json::from_value(msg.data.clone())?;
        let transfer_id = meta.transfer_id.clone();
        let session = match ReceiveSession::new(meta) {
            Ok(session) => session,
            Err(e) => {
                self.reply(msg, msg.reply_with_exception(json!(e.to_string())));
                return Err(e);
            }
        };

        tracing::debug!(
            transfer_id = %transfer_id,
            name = %session.meta().name,
            size = session.meta().size,
            "incoming transfer announced"
        );
        {
            let mut receives = self.receives.lock().expect("receives lock");
            receives.insert(transfer_id.clone(), session);
        }
        self.reply(
            msg,
            msg.reply_with(json!(ChunkRef { transfer_id, index: 0 })),
        );
        Ok(())
    }

    fn on_chunk(
        &self,
        msg: &Message,
        payload: &[u8],
    ) -> Result<(), TransferError> {
        let chunk: ChunkRef = serde_json::from_value(msg.data.clone())?;
        let (received_bytes, total_bytes) = {
            let mut receives = self.receives.lock().expect("receives lock");
            let session =
                receives.get_mut(&chunk.transfer_id).ok_or_else(|| {
                    TransferError::UnknownTransfer(chunk.transfer_id.clone())
                })?;
            session.store_chunk(chunk.index, payload.to_vec())?;
            (session.received_bytes(), session.meta().size)
        };

        self.emit(TransferEvent::ReceiveProgress {
            transfer_id: chunk.transfer_id.clone(),
            received_bytes,
            total_bytes,
        });
        self.send_to(
            msg.from_peer.clone(),
            Message::new(
                MSG_FILE_READY,
                json!(ChunkRef {
                    transfer_id: chunk.transfer_id,
                    index: chunk.index + 1,
                }),
            ),
        );
        Ok(())
    }

    fn on_complete(&self, msg: &Message) -> Result<(), TransferError> {
        let tref: TransferRef = serde_json::from_value(msg.data.clone())?;
        let mut receives = self.receives.lock().expect("receives lock");
        let session = receives.get(&tref.transfer_id).ok_or_else(|| {
            TransferError::UnknownTransfer(tref.transfer_id.clone())
        })?;

        if let Some(missing) = session.first_missing() {
            drop(receives);
            tracing::debug!(
                transfer_id = %tref.transfer_id,
                missing,
                "verification found a gap, requesting retry"
            );
            self.send_to(
                msg.from_peer.clone(),
                Message::new(
                    MSG_FILE_RETRY,
                    json!(ChunkRef {
                        transfer_id: tref.transfer_id,
                        index: missing,
                    }),
                ),
            );
            return Ok(());
        }

        let session = receives
            .remove(&tref.transfer_id)
            .expect("session present under lock");
        drop(receives);

        let name = session.meta().name.clone();
        let content_type = session.meta().content_type.clone();
        let data = session.merge();
        tracing::info!(
            transfer_id = %tref.transfer_id,
            name = %name,
            bytes = data.len(),
            "transfer received"
        );
        self.emit(TransferEvent::Received {
            transfer_id: tref.transfer_id.clone(),
            name,
            content_type,
            data,
        });
        self.send_to(
            msg.from_peer.clone(),
            Message::new(
                MSG_FILE_FINISH,
                json!(TransferRef {
                    transfer_id: tref.transfer_id
                }),
            ),
        );
        Ok(())
    }

    fn route_ack(&self, transfer_id: &str, signal: AckSignal) {
        let slot = self.send_slot.lock().expect("send slot lock");
        match slot.as_ref() {
            Some(active) if active.transfer_id == transfer_id => {
                let _ = active.acks.send(signal);
            }
            _ => {
                tracing::debug!(
                    transfer_id,
                    ?signal,
                    "ack for inactive transfer dropped"
                );
            }
        }
    }

    /// Aborts every in-flight transfer, both directions. Called when
    /// the connection goes away.
    pub fn abort_all(&self) {
        if let Some(active) = self.send_slot.lock().expect("send slot lock").take()
        {
            let _ = active.acks.send(AckSignal::Abort);
        }
        let orphaned: Vec<String> = {
            let mut receives = self.receives.lock().expect("receives lock");
            receives.drain().map(|(id, _)| id).collect()
        };
        for transfer_id in orphaned {
            self.emit(TransferEvent::Failed {
                transfer_id,
                reason: "connection closed".to_string(),
            });
        }
    }

    fn release_send_slot(&self, transfer_id: &str) {
        let mut slot = self.send_slot.lock().expect("send slot lock");
        if slot
            .as_ref()
            .is_some_and(|active| active.transfer_id == transfer_id)
        {
            *slot = None;
        }
    }

    fn emit(&self, event: TransferEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("transfer event dropped, no listener");
        }
    }

    fn reply(&self, to: &Message, reply: Message) {
        if self.sink.send(reply).is_err() {
            tracing::debug!(kind = %to.kind, "transfer reply dropped, sink closed");
        }
    }

    fn send_to(&self, recipient: Option<PeerId>, mut msg: Message) {
        if let Some(peer) = recipient {
            msg.to_recipients = vec![peer];
        }
        if self.sink.send(msg).is_err() {
            tracing::debug!("transfer control message dropped, sink closed");
        }
    }
}
