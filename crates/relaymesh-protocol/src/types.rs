//! Core protocol types for Relaymesh's wire format.
//!
//! This module defines the structures that travel on the wire: the
//! routed [`Message`] (text frames, JSON) and the identifiers and
//! reserved type names shared by every other layer.
//!
//! The same message model is used symmetrically by the server and by
//! clients — there is no separate "client message" shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A unique identifier for a connection endpoint.
///
/// Peer ids are opaque strings generated by the accepting side
/// (e.g. `peer_3fa9c0…`) and stamped on every relayed message. The
/// newtype keeps them from being confused with message ids, which are
/// also strings.
///
/// `#[serde(transparent)]` serializes a `PeerId` as the plain string,
/// so `"toRecipients": ["peer_ab12"]` on the wire, not a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Reserved message types
// ---------------------------------------------------------------------------

/// Server → client: handshake complete, `data` carries the assigned peer id.
pub const MSG_CONNECTED: &str = "Connected";

/// Heartbeat probe. Either side may send it; the receiver answers with a
/// correlated `Beat_Response`.
pub const MSG_BEAT: &str = "Beat";

/// Marker type for opaque binary payloads that ride the framing codec
/// without belonging to the file-transfer family.
pub const MSG_BINARY: &str = "Binary";

/// Suffix appended to a request type to derive its reply type.
pub const RESPONSE_SUFFIX: &str = "_Response";

/// Prefix for progress notifications that extend a pending request's
/// timeout without resolving it.
pub const PROGRESS_PREFIX: &str = "Progress_";

/// Sender → receiver: transfer metadata (name, size, chunk size, …).
pub const MSG_FILE_META: &str = "FileMeta";
/// Receiver → sender: ready for (or acknowledging up to) a chunk index.
pub const MSG_FILE_READY: &str = "FileReady";
/// Sender → receiver: one chunk of payload, carried in a binary frame.
pub const MSG_FILE_CHUNK: &str = "FileChunk";
/// Sender → receiver: claim that every chunk has been sent.
pub const MSG_FILE_COMPLETE: &str = "FileComplete";
/// Receiver → sender: verification found a gap; names the first missing
/// chunk index so the sender can resume from there.
pub const MSG_FILE_RETRY: &str = "FileRetry";
/// Receiver → sender: merge verified, release the cached send session.
pub const MSG_FILE_FINISH: &str = "FileFinish";

/// The closed set of file-transfer message types. Anything in this list
/// is consumed by the transfer engine and never reaches user handlers.
pub const FILE_MESSAGE_TYPES: [&str; 6] = [
    MSG_FILE_META,
    MSG_FILE_READY,
    MSG_FILE_CHUNK,
    MSG_FILE_COMPLETE,
    MSG_FILE_RETRY,
    MSG_FILE_FINISH,
];

/// Returns `true` if `kind` belongs to the file-transfer family.
pub fn is_file_message(kind: &str) -> bool {
    FILE_MESSAGE_TYPES.contains(&kind)
}

/// Derives the default reply type for a request type: `Chat` → `Chat_Response`.
pub fn response_type(kind: &str) -> String {
    format!("{kind}{RESPONSE_SUFFIX}")
}

/// Derives the progress type for a request type: `Chat` → `Progress_Chat`.
pub fn progress_type(kind: &str) -> String {
    format!("{PROGRESS_PREFIX}{kind}")
}

/// Returns `true` if `kind` is a reply type (carries the response suffix).
pub fn is_response_type(kind: &str) -> bool {
    kind.ends_with(RESPONSE_SUFFIX)
}

// ---------------------------------------------------------------------------
// Message — the unit of routing
// ---------------------------------------------------------------------------

/// A routed application message (the JSON text-frame format).
///
/// Wire shape (camelCase field names, optional fields omitted when empty):
///
/// ```json
/// { "type": "Chat", "data": "hi", "messageId": "msg_ab12…",
///   "toRecipients": ["peer_cd34…"], "fromPeer": "peer_ef56…",
///   "awaitReply": true }
/// ```
///
/// `from_peer` is stamped by the *receiving* endpoint before local
/// processing or relay — whatever the sender put there is never trusted.
/// `exception` is mutually exclusive with a success `data` payload; a
/// reply carries one or the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Application-defined or reserved message type.
    #[serde(rename = "type")]
    pub kind: String,

    /// Polymorphic payload: structured value, string, or null.
    /// Raw bytes never ride this field — they go through the framing
    /// codec with the `Message` as frame metadata.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Correlation id. Generated by the sender when awaiting a reply;
    /// echoed back unchanged on the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Explicit recipient list. Empty means "no forwarding" for a
    /// request, or "everyone" for a broadcast — the registry decides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_recipients: Vec<PeerId>,

    /// Origin peer id, stamped by the receiving endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_peer: Option<PeerId>,

    /// Whether the sender registered a pending correlation entry and
    /// expects exactly one resolution (reply, exception, or timeout).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub await_reply: bool,

    /// Overrides the derived `<type>_Response` reply type. Used by the
    /// transfer engine (meta replies arrive as `FileReady`) and kept
    /// internal otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_type: Option<String>,

    /// Error payload on a failed reply. Mutually exclusive with `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
}

impl Message {
    /// Creates a message of the given type with a payload.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            message_id: None,
            to_recipients: Vec::new(),
            from_peer: None,
            await_reply: false,
            reply_to_type: None,
            exception: None,
        }
    }

    /// Sets the correlation id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the recipient list.
    pub fn with_recipients(mut self, recipients: Vec<PeerId>) -> Self {
        self.to_recipients = recipients;
        self
    }

    /// Sets the origin peer.
    pub fn with_from_peer(mut self, peer: impl Into<PeerId>) -> Self {
        self.from_peer = Some(peer.into());
        self
    }

    /// The type a reply to this message will carry: the explicit
    /// `reply_to_type` override if present, else `<type>_Response`.
    pub fn reply_type(&self) -> String {
        self.reply_to_type
            .clone()
            .unwrap_or_else(|| response_type(&self.kind))
    }

    /// Builds the reply to this message: same correlation id, reply
    /// type, recipient swapped back to the sender.
    pub fn reply_with(&self, data: Value) -> Message {
        let mut reply = Message::new(self.reply_type(), data);
        reply.message_id = self.message_id.clone();
        if let Some(sender) = &self.from_peer {
            reply.to_recipients = vec![sender.clone()];
        }
        reply
    }

    /// Builds a failed reply carrying an exception payload.
    pub fn reply_with_exception(&self, exception: Value) -> Message {
        let mut reply = self.reply_with(Value::Null);
        reply.exception = Some(exception);
        reply
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is shared with non-Rust peers, so these tests pin
    //! the exact JSON field names and the omit-when-empty behavior.

    use super::*;
    use serde_json::json;

    // =====================================================================
    // PeerId
    // =====================================================================

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PeerId::from("peer_ab12")).unwrap();
        assert_eq!(json, "\"peer_ab12\"");
    }

    #[test]
    fn test_peer_id_deserializes_from_plain_string() {
        let pid: PeerId = serde_json::from_str("\"peer_ab12\"").unwrap();
        assert_eq!(pid, PeerId::from("peer_ab12"));
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId::from("peer_7").to_string(), "peer_7");
    }

    // =====================================================================
    // Reserved type helpers
    // =====================================================================

    #[test]
    fn test_response_type_appends_suffix() {
        assert_eq!(response_type("Chat"), "Chat_Response");
        assert_eq!(response_type("Beat"), "Beat_Response");
    }

    #[test]
    fn test_progress_type_prepends_prefix() {
        assert_eq!(progress_type("Chat"), "Progress_Chat");
    }

    #[test]
    fn test_is_response_type() {
        assert!(is_response_type("Chat_Response"));
        assert!(!is_response_type("Chat"));
        assert!(!is_response_type("Response_Chat"));
    }

    #[test]
    fn test_is_file_message_covers_whole_family() {
        for kind in FILE_MESSAGE_TYPES {
            assert!(is_file_message(kind), "{kind} should be a file message");
        }
        assert!(!is_file_message("Chat"));
        assert!(!is_file_message("FileMeta_Response"));
    }

    // =====================================================================
    // Message JSON shape
    // =====================================================================

    #[test]
    fn test_message_uses_spec_field_names() {
        let msg = Message {
            kind: "Chat".into(),
            data: json!("hi"),
            message_id: Some("msg_1".into()),
            to_recipients: vec![PeerId::from("u2")],
            from_peer: Some(PeerId::from("u1")),
            await_reply: true,
            reply_to_type: Some("Chat_Response".into()),
            exception: None,
        };
        let json: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Chat");
        assert_eq!(json["data"], "hi");
        assert_eq!(json["messageId"], "msg_1");
        assert_eq!(json["toRecipients"], json!(["u2"]));
        assert_eq!(json["fromPeer"], "u1");
        assert_eq!(json["awaitReply"], true);
        assert_eq!(json["replyToType"], "Chat_Response");
    }

    #[test]
    fn test_message_omits_empty_optional_fields() {
        let msg = Message::new("Beat", Value::Null);
        let json: Value = serde_json::to_value(&msg).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 1, "only \"type\" should be present: {obj:?}");
        assert_eq!(json["type"], "Beat");
    }

    #[test]
    fn test_message_deserializes_with_defaults() {
        let msg: Message = serde_json::from_str(r#"{"type":"Beat"}"#).unwrap();
        assert_eq!(msg.kind, "Beat");
        assert!(msg.data.is_null());
        assert!(msg.message_id.is_none());
        assert!(msg.to_recipients.is_empty());
        assert!(!msg.await_reply);
    }

    #[test]
    fn test_message_round_trip() {
        let msg = Message::new("Chat", json!({"text": "hello"}))
            .with_message_id("msg_9")
            .with_recipients(vec![PeerId::from("u2"), PeerId::from("u3")]);
        let text = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, decoded);
    }

    // =====================================================================
    // reply_with()
    // =====================================================================

    #[test]
    fn test_reply_with_swaps_sender_into_recipients() {
        let mut req = Message::new("Chat", json!("hi")).with_message_id("m1");
        req.from_peer = Some(PeerId::from("u1"));

        let reply = req.reply_with(json!("ok"));

        assert_eq!(reply.kind, "Chat_Response");
        assert_eq!(reply.message_id.as_deref(), Some("m1"));
        assert_eq!(reply.to_recipients, vec![PeerId::from("u1")]);
        assert!(reply.exception.is_none());
    }

    #[test]
    fn test_reply_with_honors_reply_to_type_override() {
        let mut req = Message::new("FileMeta", json!({})).with_message_id("f1");
        req.reply_to_type = Some(MSG_FILE_READY.to_string());

        let reply = req.reply_with(json!({"index": 0}));

        assert_eq!(reply.kind, "FileReady");
    }

    #[test]
    fn test_reply_with_exception_clears_data() {
        let req = Message::new("Chat", json!("hi")).with_message_id("m1");
        let reply = req.reply_with_exception(json!({"message": "nope"}));

        assert!(reply.data.is_null());
        assert_eq!(reply.exception, Some(json!({"message": "nope"})));
    }
}
