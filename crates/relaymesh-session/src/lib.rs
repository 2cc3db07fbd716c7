//! Identity and session state for Relaymesh.
//!
//! Two small concerns live here:
//!
//! - **Identity** — random, prefix-tagged identifiers for peers,
//!   messages, and transfers ([`peer_id`], [`message_id`],
//!   [`transfer_id`]).
//! - **Cookies** — the `key=value&` session string carried alongside a
//!   connection ([`CookieJar`]), with a pluggable [`CookieCipher`] seam.

mod cipher;
mod cookies;
mod error;
mod identity;

pub use cipher::{CookieCipher, PassthroughCipher};
pub use cookies::CookieJar;
pub use error::SessionError;
pub use identity::{message_id, peer_id, transfer_id};
