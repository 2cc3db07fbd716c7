//! Transfer session state.
//!
//! A transfer is identified by its metadata ([`TransferMeta`]) and
//! reassembled on the receiving side in a [`ReceiveSession`]: a sparse
//! chunk table that tolerates redelivery and gaps, verifies
//! completeness against the declared size, and merges into the final
//! byte vector only once every chunk is present.

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Metadata announcing a transfer, carried in the `FileMeta` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    /// Unique id for this transfer (`file_<32 hex>`).
    pub transfer_id: String,
    /// File name as presented to the receiver.
    pub name: String,
    /// MIME type, when the sender knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Total payload size in bytes.
    pub size: u64,
    /// Chunk size in bytes. Every chunk but the last is exactly this
    /// long; the last carries the remainder.
    pub chunk_size: u32,
}

impl TransferMeta {
    /// Number of chunks the payload splits into: `ceil(size / chunk_size)`.
    pub fn chunk_count(&self) -> u64 {
        self.size.div_ceil(self.chunk_size as u64)
    }

    /// Validates the metadata before a session is opened.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        Ok(())
    }
}

/// Receiving side of one transfer: chunks accumulated out of a sparse
/// table until verification passes.
#[derive(Debug)]
pub struct ReceiveSession {
    meta: TransferMeta,
    chunks: Vec<Option<Vec<u8>>>,
}

impl ReceiveSession {
    /// Opens a session sized from validated metadata.
    pub fn new(meta: TransferMeta) -> Result<Self, TransferError> {
        meta.validate()?;
        let count = meta.chunk_count() as usize;
        Ok(Self {
            meta,
            chunks: vec![None; count],
        })
    }

    /// The announced metadata.
    pub fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    /// Stores a chunk. Redelivery of an already-stored index overwrites
    /// it; an index past the expected range is an error.
    pub fn store_chunk(
        &mut self,
        index: u64,
        bytes: Vec<u8>,
    ) -> Result<(), TransferError> {
        let slot = self.chunks.get_mut(index as usize).ok_or_else(|| {
            TransferError::ChunkOutOfRange {
                transfer_id: self.meta.transfer_id.clone(),
                index,
            }
        })?;
        *slot = Some(bytes);
        Ok(())
    }

    /// Number of chunks received so far.
    pub fn received_count(&self) -> u64 {
        self.chunks.iter().filter(|c| c.is_some()).count() as u64
    }

    /// Bytes received so far, for progress reporting.
    pub fn received_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .flatten()
            .map(|c| c.len() as u64)
            .sum()
    }

    /// The lowest chunk index still missing, if any. This is the resume
    /// point named in a retry request.
    pub fn first_missing(&self) -> Option<u64> {
        self.chunks
            .iter()
            .position(|c| c.is_none())
            .map(|i| i as u64)
    }

    /// Returns `true` once every chunk is present.
    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }

    /// Concatenates all chunks into the final payload, truncated to the
    /// declared size.
    ///
    /// Callers check [`is_complete`](ReceiveSession::is_complete) first;
    /// missing chunks merge as gaps of nothing, which verification
    /// prevents from ever being observed.
    pub fn merge(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.meta.size as usize);
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out.truncate(self.meta.size as usize);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64, chunk_size: u32) -> TransferMeta {
        TransferMeta {
            transfer_id: "file_test".to_string(),
            name: "demo.bin".to_string(),
            content_type: None,
            size,
            chunk_size,
        }
    }

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(meta(10, 4).chunk_count(), 3);
        assert_eq!(meta(8, 4).chunk_count(), 2);
        assert_eq!(meta(1, 4).chunk_count(), 1);
        assert_eq!(meta(0, 4).chunk_count(), 0);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let err = ReceiveSession::new(meta(10, 0)).expect_err("invalid");
        assert!(matches!(err, TransferError::InvalidChunkSize));
    }

    #[test]
    fn test_store_and_merge_in_order() {
        let mut session = ReceiveSession::new(meta(10, 4)).expect("session");
        session.store_chunk(0, vec![1, 2, 3, 4]).expect("store");
        session.store_chunk(1, vec![5, 6, 7, 8]).expect("store");
        session.store_chunk(2, vec![9, 10]).expect("store");
        assert!(session.is_complete());
        assert_eq!(session.merge(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_first_missing_names_resume_point() {
        let mut session = ReceiveSession::new(meta(12, 4)).expect("session");
        session.store_chunk(0, vec![0; 4]).expect("store");
        session.store_chunk(2, vec![0; 4]).expect("store");
        assert_eq!(session.first_missing(), Some(1));
        assert!(!session.is_complete());
        assert_eq!(session.received_count(), 2);
        assert_eq!(session.received_bytes(), 8);
    }

    #[test]
    fn test_redelivered_chunk_overwrites() {
        let mut session = ReceiveSession::new(meta(4, 4)).expect("session");
        session.store_chunk(0, vec![1, 1, 1, 1]).expect("store");
        session.store_chunk(0, vec![2, 2, 2, 2]).expect("store");
        assert_eq!(session.merge(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_out_of_range_chunk_is_rejected() {
        let mut session = ReceiveSession::new(meta(4, 4)).expect("session");
        let err = session.store_chunk(1, vec![0]).expect_err("out of range");
        assert!(matches!(
            err,
            TransferError::ChunkOutOfRange { index: 1, .. }
        ));
    }

    #[test]
    fn test_merge_truncates_to_declared_size() {
        // Sender padded the last chunk; the declared size wins.
        let mut session = ReceiveSession::new(meta(6, 4)).expect("session");
        session.store_chunk(0, vec![1, 2, 3, 4]).expect("store");
        session.store_chunk(1, vec![5, 6, 0, 0]).expect("store");
        assert_eq!(session.merge(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_empty_file_session_is_immediately_complete() {
        let session = ReceiveSession::new(meta(0, 4)).expect("session");
        assert!(session.is_complete());
        assert_eq!(session.merge(), Vec::<u8>::new());
    }
}
