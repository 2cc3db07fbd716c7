//! Relaymesh: bidirectional WebSocket messaging with request/reply
//! correlation, peer-to-peer relay, and chunked file transfer.
//!
//! The meta crate ties the workspace together:
//!
//! - [`Server`] — accept loop, per-connection handling, and the
//!   [`ConnectionRegistry`] for server-initiated delivery.
//! - [`Client`] — lifecycle-managed connection with handshake,
//!   heartbeat, and bounded reconnect.
//! - [`ServerConfig`] / [`ClientConfig`] — tunables with the protocol's
//!   defaults.
//!
//! The layers underneath are re-exported for direct use:
//! `relaymesh-protocol` (wire format), `relaymesh-transport`
//! (WebSocket adapters), `relaymesh-session` (identity and cookies),
//! `relaymesh-router` (handlers and correlation), and
//! `relaymesh-transfer` (file transfer).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relaymesh::{Client, ClientConfig, Message, Router, Server, ServerConfig};
//!
//! # async fn run() -> Result<(), relaymesh::RelayError> {
//! // Server with an echo handler.
//! let router = Arc::new(Router::new());
//! router.register(&["Echo"], |msg: &Message, ctx: &relaymesh::ReplyContext| {
//!     ctx.reply(msg, msg.data.clone());
//! });
//! let server = Server::bind(ServerConfig::default(), router).await?;
//! tokio::spawn(server.run());
//!
//! // Client asking for the echo.
//! let (client, _events) = Client::connect(
//!     "ws://127.0.0.1:3000",
//!     ClientConfig::default(),
//!     Arc::new(Router::new()),
//! )
//! .await?;
//! let reply = client
//!     .send_and_await(Message::new("Echo", serde_json::json!("hi")))
//!     .await?;
//! assert_eq!(reply.data, serde_json::json!("hi"));
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod registry;
mod server;
mod wire;

pub use client::{Client, ConnectionState};
pub use config::{ClientConfig, ServerConfig};
pub use error::RelayError;
pub use registry::{ConnectionRegistry, DeliveryError, DeliveryReport};
pub use server::Server;

pub use relaymesh_protocol::{Message, PeerId, ProtocolError};
pub use relaymesh_router::{
    CorrelationError, Handler, HandlerId, MessageSink, Outbound,
    PendingTable, ReplyContext, Router,
};
pub use relaymesh_session::{CookieCipher, CookieJar, PassthroughCipher};
pub use relaymesh_transfer::{TransferEngine, TransferError, TransferEvent};
pub use relaymesh_transport::TransportError;

/// Installs a `tracing` subscriber reading the `RUST_LOG` filter, for
/// binaries and tests. Safe to call more than once; only the first
/// call installs.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
