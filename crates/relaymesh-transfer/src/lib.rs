//! Chunked, resumable file transfer for Relaymesh.
//!
//! Payloads ride the binary framing codec in fixed-size chunks, one
//! acknowledgement at a time, with verification on the receiving side
//! and resume-from-gap retry when a chunk went missing. See
//! [`TransferEngine`] for the full protocol walk.

mod engine;
mod error;
mod session;

pub use engine::{
    DEFAULT_ACK_TIMEOUT, DEFAULT_CHUNK_SIZE, TransferEngine, TransferEvent,
};
pub use error::TransferError;
pub use session::{ReceiveSession, TransferMeta};
