//! Server-side connection registry.
//!
//! Tracks every connected peer's outbound queue and offers unicast,
//! multicast, and broadcast delivery. Delivery to several recipients
//! never fails as a whole: each peer succeeds or fails independently
//! and the [`DeliveryReport`] records both sides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use relaymesh_protocol::{Message, PeerId};
use relaymesh_router::{MessageSink, Outbound};
use relaymesh_transfer::TransferEngine;

use crate::error::RelayError;

/// Why delivery to one peer failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// No peer with that id is registered.
    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    /// The peer is registered but its writer task is gone.
    #[error("connection to peer {0} closed")]
    ConnectionClosed(PeerId),
}

/// Per-peer outcome of a multi-recipient delivery.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Peers whose queues accepted the message.
    pub delivered: Vec<PeerId>,
    /// Peers that could not be reached, with the reason each failed.
    pub failed: Vec<(PeerId, DeliveryError)>,
}

impl DeliveryReport {
    /// Returns `true` when every recipient accepted the message.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

type CloseHook = Box<dyn Fn(&PeerId) + Send + Sync>;

struct PeerRecord {
    sink: MessageSink,
    engine: Arc<TransferEngine>,
}

/// Registry of connected peers, shared across the accept loop and
/// every connection task.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer's outbound queue and transfer engine.
    pub fn register(
        &self,
        peer: PeerId,
        sink: MessageSink,
        engine: Arc<TransferEngine>,
    ) {
        let mut peers = self.peers.write().expect("registry lock");
        if peers.insert(peer.clone(), PeerRecord { sink, engine }).is_some() {
            tracing::warn!(%peer, "peer re-registered, replacing previous record");
        }
        tracing::info!(%peer, total = peers.len(), "peer registered");
    }

    /// Removes a peer and runs every close hook for it.
    pub fn unregister(&self, peer: &PeerId) {
        let removed = {
            let mut peers = self.peers.write().expect("registry lock");
            peers.remove(peer).is_some()
        };
        if !removed {
            return;
        }
        tracing::info!(%peer, "peer unregistered");
        let hooks = self.close_hooks.lock().expect("hooks lock");
        for hook in hooks.iter() {
            hook(peer);
        }
    }

    /// Registers a hook invoked after a peer is unregistered.
    pub fn on_close<F>(&self, hook: F)
    where
        F: Fn(&PeerId) + Send + Sync + 'static,
    {
        self.close_hooks.lock().expect("hooks lock").push(Box::new(hook));
    }

    /// Returns `true` when `peer` is connected.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.read().expect("registry lock").contains_key(peer)
    }

    /// Ids of every connected peer.
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.read().expect("registry lock").keys().cloned().collect()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().expect("registry lock").len()
    }

    /// Returns `true` when no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues one item for a single peer.
    pub fn unicast(
        &self,
        peer: &PeerId,
        item: Outbound,
    ) -> Result<(), DeliveryError> {
        let peers = self.peers.read().expect("registry lock");
        let record = peers
            .get(peer)
            .ok_or_else(|| DeliveryError::PeerNotFound(peer.clone()))?;
        let result = match item {
            Outbound::Message(msg) => record.sink.send(msg),
            Outbound::Frame { payload, metadata } => {
                record.sink.send_frame(payload, metadata)
            }
        };
        result.map_err(|_| DeliveryError::ConnectionClosed(peer.clone()))
    }

    /// Starts sending a file to a connected peer; progress arrives on
    /// the server's transfer event stream. Returns the transfer id.
    pub fn send_file(
        &self,
        peer: &PeerId,
        name: impl Into<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<String, RelayError> {
        let engine = {
            let peers = self.peers.read().expect("registry lock");
            peers
                .get(peer)
                .map(|record| record.engine.clone())
                .ok_or_else(|| DeliveryError::PeerNotFound(peer.clone()))?
        };
        Ok(engine.send_file(name, content_type, data)?)
    }

    /// Queues one item for each named recipient.
    pub fn multicast(
        &self,
        recipients: &[PeerId],
        item: Outbound,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for peer in recipients {
            match self.unicast(peer, item.clone()) {
                Ok(()) => report.delivered.push(peer.clone()),
                Err(e) => report.failed.push((peer.clone(), e)),
            }
        }
        report
    }

    /// Queues a message for every connected peer except those in
    /// `exclude` (typically the sender).
    pub fn broadcast(
        &self,
        msg: Message,
        exclude: &[PeerId],
    ) -> DeliveryReport {
        let recipients: Vec<PeerId> = {
            let peers = self.peers.read().expect("registry lock");
            peers
                .keys()
                .filter(|p| !exclude.contains(*p))
                .cloned()
                .collect()
        };
        self.multicast(&recipients, Outbound::Message(msg))
    }
}
