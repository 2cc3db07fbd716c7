//! Wire protocol for Relaymesh.
//!
//! This crate defines the "language" spoken across a Relaymesh
//! connection:
//!
//! - **Types** ([`Message`], [`PeerId`], the reserved message-type
//!   constants) — the structures and names that travel on the wire.
//! - **Codec** ([`encode_frame`]/[`decode_frame`] for binary envelopes,
//!   [`encode_message`]/[`decode_message`] for JSON text frames).
//! - **Errors** ([`ProtocolError`]) — what can go wrong while encoding
//!   or decoding, including the framing taxonomy.
//!
//! The protocol layer sits between transport (raw frames) and routing
//! (correlation + handler dispatch). It knows nothing about
//! connections, peers' liveness, or transfers — only how bytes map to
//! messages.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Router / Transfer engine
//! ```

mod codec;
mod error;
mod types;

pub use codec::{
    FRAME_OVERHEAD, FRAME_TAG, FrameParts, decode_frame, decode_message,
    encode_frame, encode_message,
};
pub use error::ProtocolError;
pub use types::{
    FILE_MESSAGE_TYPES, MSG_BEAT, MSG_BINARY, MSG_CONNECTED,
    MSG_FILE_CHUNK, MSG_FILE_COMPLETE, MSG_FILE_FINISH, MSG_FILE_META,
    MSG_FILE_READY, MSG_FILE_RETRY, Message, PROGRESS_PREFIX, PeerId,
    RESPONSE_SUFFIX, is_file_message, is_response_type, progress_type,
    response_type,
};
