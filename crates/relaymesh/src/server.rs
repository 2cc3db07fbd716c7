//! The relay server: accept loop and shared state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use relaymesh_protocol::PeerId;
use relaymesh_router::Router;
use relaymesh_transfer::TransferEvent;
use relaymesh_transport::{Transport, WebSocketTransport};

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::handler::{ServerState, handle_connection};
use crate::registry::ConnectionRegistry;

/// A bound relay server. Drive it with [`Server::run`].
pub struct Server {
    state: Arc<ServerState>,
    transport: WebSocketTransport,
    transfer_events: Option<mpsc::UnboundedReceiver<(PeerId, TransferEvent)>>,
}

impl Server {
    /// Binds the server to `config.addr()` with the given router.
    pub async fn bind(
        config: ServerConfig,
        router: Arc<Router>,
    ) -> Result<Self, RelayError> {
        let transport = WebSocketTransport::bind(&config.addr()).await?;
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            router,
            transfer_events: transfer_tx,
        });
        Ok(Self {
            state,
            transport,
            transfer_events: Some(transfer_rx),
        })
    }

    /// The registry of connected peers, for server-initiated delivery.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.state.registry.clone()
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Takes the stream of transfer events, tagged with the peer each
    /// belongs to. Yields `None` after the first call.
    pub fn transfer_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<(PeerId, TransferEvent)>> {
        self.transfer_events.take()
    }

    /// Accepts connections forever, spawning a task per peer.
    ///
    /// Individual accept failures are logged and skipped.
    pub async fn run(mut self) -> Result<(), RelayError> {
        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    tokio::spawn(handle_connection(self.state.clone(), conn));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
