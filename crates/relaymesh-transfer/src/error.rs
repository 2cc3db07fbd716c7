//! Error types for file transfer.

use relaymesh_router::CorrelationError;

/// Errors that can occur while sending or receiving a file.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The connection already has an outbound transfer running.
    #[error("a transfer is already in progress on this connection")]
    TransferInProgress,

    /// The remote side went silent mid-transfer.
    #[error("transfer {0} timed out")]
    TransferTimeout(String),

    /// A chunk landed outside the session's expected range.
    #[error("transfer {transfer_id}: chunk index {index} out of range")]
    ChunkOutOfRange {
        /// Transfer the chunk claimed to belong to.
        transfer_id: String,
        /// The offending chunk index.
        index: u64,
    },

    /// A chunk or control message referenced a transfer never announced
    /// with metadata.
    #[error("unknown transfer {0}")]
    UnknownTransfer(String),

    /// Transfer metadata declared a zero chunk size.
    #[error("invalid chunk size: must be non-zero")]
    InvalidChunkSize,

    /// The remote side aborted the transfer.
    #[error("transfer {0} aborted")]
    Aborted(String),

    /// The metadata exchange failed.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// A transfer control payload could not be (de)serialized.
    #[error("malformed transfer payload: {0}")]
    Payload(#[from] serde_json::Error),
}
