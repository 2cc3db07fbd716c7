//! Binary framing codec.
//!
//! Non-JSON-safe payloads (file chunks, opaque blobs) ride a
//! self-describing binary envelope so one wire format serves both
//! runtimes:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────┬────────────┐
//! │ payload bytes   │ metadata JSON   │ u16 BE len   │ 3-byte tag │
//! │ (variable)      │ (a Message)     │ of metadata  │ (ASCII)    │
//! └─────────────────┴─────────────────┴──────────────┴────────────┘
//! ```
//!
//! The length field is **big-endian**, on both encode and decode, on
//! every platform. Decode validates the trailer before trusting
//! anything: tag first, then length bounds, then the metadata JSON.
//! A failed frame is fatal only to itself — the connection stays up —
//! and the error carries the raw frame for diagnostics.

use crate::{Message, ProtocolError};

/// Default frame tag. Both ends must agree on the tag; a mismatch is a
/// hard decode failure, never silently ignored.
pub const FRAME_TAG: [u8; 3] = *b"rmx";

/// Trailer size: 2-byte length field + 3-byte tag.
pub const FRAME_OVERHEAD: usize = 5;

/// The two halves of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameParts {
    /// The routed message that describes the payload.
    pub metadata: Message,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Encodes a payload and its describing message into one binary frame.
///
/// Never mutates the caller's buffers; always produces a fresh
/// concatenation.
///
/// # Errors
/// - [`ProtocolError::Encode`] if the metadata fails to serialize.
/// - [`ProtocolError::MetadataTooLarge`] if the serialized metadata
///   exceeds what the u16 length field can describe.
pub fn encode_frame(
    payload: &[u8],
    metadata: &Message,
    tag: [u8; 3],
) -> Result<Vec<u8>, ProtocolError> {
    let meta = serde_json::to_vec(metadata).map_err(ProtocolError::Encode)?;
    if meta.len() > u16::MAX as usize {
        return Err(ProtocolError::MetadataTooLarge(meta.len()));
    }

    let mut frame =
        Vec::with_capacity(payload.len() + meta.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&meta);
    frame.extend_from_slice(&(meta.len() as u16).to_be_bytes());
    frame.extend_from_slice(&tag);
    Ok(frame)
}

/// Decodes a binary frame, validating tag, length, and metadata in that
/// order.
///
/// # Errors
/// - [`ProtocolError::TagMismatch`] — trailing tag differs from `tag`.
/// - [`ProtocolError::CorruptLength`] — declared metadata length does
///   not fit in the frame (`len > frame_len - 5`).
/// - [`ProtocolError::CorruptMetadata`] — metadata bytes are not a
///   valid `Message`.
pub fn decode_frame(
    frame: &[u8],
    tag: [u8; 3],
) -> Result<FrameParts, ProtocolError> {
    // Tag check comes first: a frame too short to even carry a tag is a
    // tag mismatch, not a length problem.
    if frame.len() < 3 || frame[frame.len() - 3..] != tag {
        let found = frame[frame.len().saturating_sub(3)..].to_vec();
        return Err(ProtocolError::TagMismatch {
            expected: tag,
            found,
            frame: frame.to_vec(),
        });
    }

    if frame.len() < FRAME_OVERHEAD {
        return Err(ProtocolError::CorruptLength {
            declared: 0,
            available: 0,
            frame: frame.to_vec(),
        });
    }

    let len_offset = frame.len() - FRAME_OVERHEAD;
    let declared = u16::from_be_bytes([frame[len_offset], frame[len_offset + 1]])
        as usize;
    let available = frame.len() - FRAME_OVERHEAD;
    if declared > available {
        return Err(ProtocolError::CorruptLength {
            declared,
            available,
            frame: frame.to_vec(),
        });
    }

    let meta_start = len_offset - declared;
    let metadata: Message = serde_json::from_slice(&frame[meta_start..len_offset])
        .map_err(|source| ProtocolError::CorruptMetadata {
            source,
            frame: frame.to_vec(),
        })?;

    Ok(FrameParts {
        metadata,
        payload: frame[..meta_start].to_vec(),
    })
}

/// Serializes a message for a text frame.
pub fn encode_message(msg: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

/// Parses a text frame into a message.
pub fn decode_message(text: &str) -> Result<Message, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_metadata() -> Message {
        Message::new("FileChunk", json!({"transferId": "file_1", "index": 0}))
            .with_message_id("msg_1")
    }

    // =====================================================================
    // Round trips
    // =====================================================================

    #[test]
    fn test_encode_decode_round_trip() {
        let payload = b"\x00\x01\x02binary payload\xff";
        let meta = chunk_metadata();

        let frame = encode_frame(payload, &meta, FRAME_TAG).unwrap();
        let parts = decode_frame(&frame, FRAME_TAG).unwrap();

        assert_eq!(parts.payload, payload);
        assert_eq!(parts.metadata, meta);
    }

    #[test]
    fn test_encode_decode_empty_payload() {
        let frame = encode_frame(&[], &chunk_metadata(), FRAME_TAG).unwrap();
        let parts = decode_frame(&frame, FRAME_TAG).unwrap();
        assert!(parts.payload.is_empty());
    }

    #[test]
    fn test_encode_does_not_mutate_inputs() {
        let payload = vec![1u8, 2, 3];
        let meta = chunk_metadata();
        let _ = encode_frame(&payload, &meta, FRAME_TAG).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_length_field_is_big_endian() {
        let meta = chunk_metadata();
        let meta_len = serde_json::to_vec(&meta).unwrap().len();
        let frame = encode_frame(b"xy", &meta, FRAME_TAG).unwrap();

        let len_offset = frame.len() - FRAME_OVERHEAD;
        let declared =
            u16::from_be_bytes([frame[len_offset], frame[len_offset + 1]]);
        assert_eq!(declared as usize, meta_len);
    }

    // =====================================================================
    // Validation order and failures
    // =====================================================================

    #[test]
    fn test_decode_wrong_tag_fails_with_tag_mismatch() {
        let frame = encode_frame(b"data", &chunk_metadata(), *b"ABC").unwrap();
        let err = decode_frame(&frame, *b"XYZ").unwrap_err();
        assert!(
            matches!(err, ProtocolError::TagMismatch { expected, .. } if expected == *b"XYZ"),
            "got {err:?}"
        );
    }

    #[test]
    fn test_decode_short_frame_fails_with_tag_mismatch() {
        // Too short to carry a tag at all — checked before the length.
        let err = decode_frame(b"ab", FRAME_TAG).unwrap_err();
        assert!(matches!(err, ProtocolError::TagMismatch { .. }));
    }

    #[test]
    fn test_decode_oversized_length_fails_with_corrupt_length() {
        // Hand-build a frame whose length field claims more metadata
        // than the frame holds.
        let mut frame = Vec::new();
        frame.extend_from_slice(b"xx");
        frame.extend_from_slice(&500u16.to_be_bytes());
        frame.extend_from_slice(&FRAME_TAG);

        let err = decode_frame(&frame, FRAME_TAG).unwrap_err();
        assert!(
            matches!(
                err,
                ProtocolError::CorruptLength { declared: 500, available: 2, .. }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn test_encode_rejects_metadata_beyond_length_field() {
        let meta = Message::new("Chat", json!("x".repeat(70_000)));
        let err = encode_frame(b"", &meta, FRAME_TAG).unwrap_err();
        assert!(matches!(err, ProtocolError::MetadataTooLarge(n) if n > u16::MAX as usize));
        assert!(err.to_string().contains("max 65535"));
    }

    #[test]
    fn test_decode_garbage_metadata_fails_with_corrupt_metadata() {
        // Correct trailer, but the metadata region is not JSON.
        let garbage = b"not json";
        let mut frame = Vec::new();
        frame.extend_from_slice(b"payload");
        frame.extend_from_slice(garbage);
        frame.extend_from_slice(&(garbage.len() as u16).to_be_bytes());
        frame.extend_from_slice(&FRAME_TAG);

        let err = decode_frame(&frame, FRAME_TAG).unwrap_err();
        assert!(matches!(err, ProtocolError::CorruptMetadata { .. }));
    }

    #[test]
    fn test_decode_failure_surfaces_offending_frame() {
        let frame = encode_frame(b"data", &chunk_metadata(), *b"ABC").unwrap();
        match decode_frame(&frame, *b"XYZ").unwrap_err() {
            ProtocolError::TagMismatch { frame: raw, .. } => {
                assert_eq!(raw, frame);
            }
            other => panic!("expected TagMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_never_partially_parses_on_tag_mismatch() {
        // A frame that would decode fine under its own tag must fail
        // atomically under the wrong one.
        let frame = encode_frame(b"data", &chunk_metadata(), *b"ABC").unwrap();
        assert!(decode_frame(&frame, *b"XYZ").is_err());
        assert!(decode_frame(&frame, *b"ABC").is_ok());
    }

    // =====================================================================
    // Text frames
    // =====================================================================

    #[test]
    fn test_encode_decode_message_round_trip() {
        let msg = Message::new("Chat", json!("hi")).with_message_id("m1");
        let text = encode_message(&msg).unwrap();
        let decoded = decode_message(&text).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_decode_message_rejects_garbage() {
        assert!(decode_message("not json at all").is_err());
        assert!(decode_message(r#"{"name": "no type field"}"#).is_err());
    }
}
