//! Transport abstraction layer for Relaymesh.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract
//! over the underlying socket. The wire distinguishes text frames
//! (JSON messages) from binary frames (framed envelopes), so
//! [`RawFrame`] preserves that distinction instead of flattening
//! everything to bytes.
//!
//! There is exactly one connection interface; the server-accept and
//! client-connect sides are two concrete adapters of the same generic
//! WebSocket connection, selected at construction time.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket adapters via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientConnection, ServerConnection, WebSocketConnection,
    WebSocketTransport, connect,
};

use std::fmt;

/// One unit received from or sent to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// A text frame — a JSON-encoded message.
    Text(String),
    /// A binary frame — a framed envelope (payload + metadata + tag).
    Binary(Vec<u8>),
}

/// Opaque transport-level identifier for a connection. Distinct from
/// the protocol-level peer id, which is assigned during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections (server side).
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single long-lived connection carrying text and binary frames.
///
/// Send and receive sides are independently lockable: a task blocked in
/// [`recv`](Connection::recv) never prevents another task from sending.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a text frame to the remote peer.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Sends a binary frame to the remote peer.
    async fn send_binary(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<RawFrame>, Self::Error>;

    /// Closes the connection with a normal close code.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the transport-level identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote peer's socket address, when known.
    fn remote_addr(&self) -> Option<std::net::SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }

    #[test]
    fn test_raw_frame_equality() {
        assert_eq!(
            RawFrame::Text("hi".into()),
            RawFrame::Text("hi".into())
        );
        assert_ne!(
            RawFrame::Text("hi".into()),
            RawFrame::Binary(b"hi".to_vec())
        );
    }
}
