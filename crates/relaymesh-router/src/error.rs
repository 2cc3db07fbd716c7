//! Error types for routing and correlation.

use serde_json::Value;

/// Errors surfaced to a caller awaiting a reply.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// No matching reply arrived within the timeout window.
    #[error("timed out waiting for reply to message {0}")]
    Timeout(String),

    /// The connection closed while the reply was pending.
    #[error("connection closed while awaiting reply")]
    ConnectionClosed,

    /// The remote peer answered with an exception payload.
    #[error("remote exception: {0}")]
    Remote(Value),

    /// The outbound queue was dropped; nothing can be sent.
    #[error("message sink closed")]
    SinkClosed,
}
