//! Message routing and reply correlation for Relaymesh.
//!
//! Two cooperating pieces live here:
//!
//! - [`PendingTable`] — per-connection registry of requests awaiting
//!   replies, with timeout, progress-extension, and exactly-once
//!   resolution semantics.
//! - [`Router`] — explicit handler registration and synchronous
//!   dispatch of inbound messages, with replies queued through a
//!   [`MessageSink`].
//!
//! The connection's reader task offers each inbound message to the
//! pending table first; only unconsumed messages reach the router.

mod correlation;
mod error;
mod router;

pub use correlation::{PendingReply, PendingTable};
pub use error::CorrelationError;
pub use router::{
    Handler, HandlerId, MessageSink, Outbound, ReplyContext, Router,
    send_and_await,
};
