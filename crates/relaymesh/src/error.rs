//! Umbrella error type for the meta crate.

use relaymesh_protocol::ProtocolError;
use relaymesh_router::CorrelationError;
use relaymesh_session::SessionError;
use relaymesh_transfer::TransferError;
use relaymesh_transport::TransportError;

/// Any error the server or client surface can produce.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding or decoding a frame failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request/reply exchange failed.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// A file transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Session or cookie handling failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Delivery to a registered peer failed.
    #[error(transparent)]
    Delivery(#[from] crate::registry::DeliveryError),

    /// An operation needs an open connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The server never completed the handshake.
    #[error("handshake timed out before the server assigned a peer id")]
    HandshakeTimeout,
}
