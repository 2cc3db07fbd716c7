//! Error types for the protocol layer.
//!
//! Framing errors (`TagMismatch`, `CorruptLength`, `CorruptMetadata`)
//! are always fatal to the single offending frame and never to the
//! connection. Each of those variants carries the raw frame bytes so a
//! caller can log the offending input; `Display` deliberately shows
//! only a summary.

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The trailing 3-byte tag did not match the expected tag.
    #[error("frame tag mismatch: expected {expected:?}, found {found:?}")]
    TagMismatch {
        /// The tag the decoder was configured with.
        expected: [u8; 3],
        /// The bytes found where the tag should be (may be short).
        found: Vec<u8>,
        /// The offending frame, for diagnostics.
        frame: Vec<u8>,
    },

    /// The metadata length field does not fit within the frame.
    #[error("corrupt metadata length: declared {declared} bytes, only {available} available")]
    CorruptLength {
        /// Length declared by the u16 field.
        declared: usize,
        /// Bytes actually available for payload + metadata.
        available: usize,
        /// The offending frame, for diagnostics.
        frame: Vec<u8>,
    },

    /// The metadata region did not parse as a `Message`.
    #[error("corrupt frame metadata: {source}")]
    CorruptMetadata {
        /// The underlying JSON error.
        source: serde_json::Error,
        /// The offending frame, for diagnostics.
        frame: Vec<u8>,
    },

    /// Serialized metadata exceeds the u16 length field.
    #[error("frame metadata too large: {0} bytes (max {max})", max = u16::MAX)]
    MetadataTooLarge(usize),

    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A text frame did not parse as a `Message`.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
