//! Random identifier generation.
//!
//! All wire-visible identifiers share one shape: a short prefix naming
//! what the id belongs to, followed by 32 hex characters of randomness.
//! The prefix makes ids self-describing in logs.

use rand::Rng;

use relaymesh_protocol::PeerId;

/// Generates a random 32-character hex token.
fn hex_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Generates a fresh peer identifier (`peer_<32 hex>`).
pub fn peer_id() -> PeerId {
    PeerId::from(format!("peer_{}", hex_token()))
}

/// Generates a fresh message identifier (`msg_<32 hex>`).
pub fn message_id() -> String {
    format!("msg_{}", hex_token())
}

/// Generates a fresh transfer identifier (`file_<32 hex>`).
pub fn transfer_id() -> String {
    format!("file_{}", hex_token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_has_prefix_and_length() {
        let id = peer_id();
        let s = id.as_str();
        assert!(s.starts_with("peer_"));
        assert_eq!(s.len(), "peer_".len() + 32);
    }

    #[test]
    fn test_message_id_is_hex_after_prefix() {
        let id = message_id();
        let hex = id.strip_prefix("msg_").expect("prefix");
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_transfer_id_has_file_prefix() {
        assert!(transfer_id().starts_with("file_"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = message_id();
        let b = message_id();
        assert_ne!(a, b);
    }
}
