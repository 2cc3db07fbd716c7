//! Reply correlation.
//!
//! Every message sent with `awaitReply` registers an entry here keyed
//! by its `messageId`. Inbound messages are offered to the table first;
//! a match resolves the waiting caller exactly once. Progress messages
//! (`Progress_<requestType>`, named after the original request) reset
//! the waiter's timeout clock without resolving it, so long-running
//! remote operations can keep a request alive by streaming progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};

use relaymesh_protocol::{Message, progress_type, response_type};

use crate::error::CorrelationError;

struct PendingEntry {
    tx: oneshot::Sender<Result<Message, CorrelationError>>,
    extend: Arc<Notify>,
    request_type: String,
    reply_type: String,
}

/// Table of requests awaiting replies, keyed by message id.
///
/// One table exists per connection, so tearing a connection down
/// rejects exactly that connection's outstanding requests.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `message_id`, a request of `request_type` awaiting a
    /// reply of `reply_type`.
    ///
    /// Registration is immediate; the returned [`PendingReply`] is
    /// awaited separately, so a caller can register, send, and only
    /// then start the clock without racing the reader task. Progress
    /// messages match on `Progress_<request_type>`.
    pub fn register(
        &self,
        message_id: &str,
        request_type: &str,
        reply_type: &str,
    ) -> PendingReply<'_> {
        let (tx, rx) = oneshot::channel();
        let extend = Arc::new(Notify::new());
        {
            let mut entries = self.entries.lock().expect("pending table lock");
            entries.insert(
                message_id.to_string(),
                PendingEntry {
                    tx,
                    extend: extend.clone(),
                    request_type: request_type.to_string(),
                    reply_type: reply_type.to_string(),
                },
            );
        }
        PendingReply {
            table: self,
            message_id: message_id.to_string(),
            rx,
            extend,
        }
    }

    /// Registers `message_id` for a request of `request_type` and waits
    /// for its `<request_type>_Response` reply.
    ///
    /// The timeout clock restarts whenever a matching progress message
    /// arrives. Resolution is exactly-once: if the reply lands in the
    /// same instant the timeout fires, the reply wins.
    pub async fn wait(
        &self,
        message_id: &str,
        request_type: &str,
        timeout: Duration,
    ) -> Result<Message, CorrelationError> {
        self.register(message_id, request_type, &response_type(request_type))
            .wait(timeout)
            .await
    }

    /// Offers an inbound message to the table.
    ///
    /// Returns `true` when the message was consumed, either by
    /// resolving a waiter or by extending its timeout.
    pub fn try_resolve(&self, msg: &Message) -> bool {
        let Some(id) = msg.message_id.as_deref() else {
            return false;
        };

        let mut entries = self.entries.lock().expect("pending table lock");
        let Some(entry) = entries.get(id) else {
            return false;
        };

        if msg.kind == progress_type(&entry.request_type) {
            entry.extend.notify_one();
            return true;
        }

        if msg.kind != entry.reply_type {
            return false;
        }

        let entry = entries.remove(id).expect("entry present under lock");
        let verdict = match &msg.exception {
            Some(exception) => Err(CorrelationError::Remote(exception.clone())),
            None => Ok(msg.clone()),
        };
        // Receiver may have gone away; nothing to do then.
        let _ = entry.tx.send(verdict);
        true
    }

    /// Removes `message_id` without resolving it. Returns `true` when
    /// the entry was still present.
    pub fn cancel(&self, message_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("pending table lock");
        entries.remove(message_id).is_some()
    }

    /// Rejects every outstanding request with
    /// [`CorrelationError::ConnectionClosed`].
    pub fn reject_all(&self) {
        let drained: Vec<PendingEntry> = {
            let mut entries = self.entries.lock().expect("pending table lock");
            entries.drain().map(|(_, e)| e).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(CorrelationError::ConnectionClosed));
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending table lock").len()
    }

    /// Returns `true` when no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered request awaiting its reply.
pub struct PendingReply<'a> {
    table: &'a PendingTable,
    message_id: String,
    rx: oneshot::Receiver<Result<Message, CorrelationError>>,
    extend: Arc<Notify>,
}

impl PendingReply<'_> {
    /// Waits for the reply, failing after `timeout` of silence.
    pub async fn wait(
        mut self,
        timeout: Duration,
    ) -> Result<Message, CorrelationError> {
        loop {
            let sleep = tokio::time::sleep(timeout);
            tokio::pin!(sleep);
            tokio::select! {
                res = &mut self.rx => {
                    return res.unwrap_or(Err(CorrelationError::ConnectionClosed));
                }
                _ = self.extend.notified() => {
                    tracing::trace!(
                        message_id = %self.message_id,
                        "progress received, timeout reset"
                    );
                    continue;
                }
                _ = &mut sleep => {
                    if self.table.cancel(&self.message_id) {
                        return Err(CorrelationError::Timeout(self.message_id));
                    }
                    // A resolver removed the entry first; its verdict is
                    // already in flight on the channel.
                    return self.rx.await
                        .unwrap_or(Err(CorrelationError::ConnectionClosed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(kind: &str, id: &str) -> Message {
        Message::new(kind, json!({"ok": true})).with_message_id(id)
    }

    #[tokio::test]
    async fn test_wait_resolves_with_matching_reply() {
        let table = Arc::new(PendingTable::new());
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                table.wait("msg_1", "Echo", Duration::from_secs(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(table.try_resolve(&reply("Echo_Response", "msg_1")));

        let resolved = waiter.await.expect("task").expect("reply");
        assert_eq!(resolved.kind, "Echo_Response");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_wait_times_out_without_reply() {
        let table = PendingTable::new();
        let err = table
            .wait("msg_2", "Echo", Duration::from_millis(30))
            .await
            .expect_err("should time out");
        assert!(matches!(err, CorrelationError::Timeout(id) if id == "msg_2"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_progress_message_extends_timeout() {
        let table = Arc::new(PendingTable::new());
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                table.wait("msg_3", "Build", Duration::from_millis(100)).await
            })
        };

        // Keep the request alive past its original deadline, then reply.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(table.try_resolve(&reply("Progress_Build", "msg_3")));
        }
        assert!(table.try_resolve(&reply("Build_Response", "msg_3")));

        assert!(waiter.await.expect("task").is_ok());
    }

    #[tokio::test]
    async fn test_progress_is_named_after_request_not_reply() {
        let table = Arc::new(PendingTable::new());
        let _waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                table.wait("msg_p", "Build", Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // `Progress_Build` extends the waiter; a reply-derived name
        // such as `Progress_Build_Response` is not a progress message.
        assert!(table.try_resolve(&reply("Progress_Build", "msg_p")));
        assert!(!table.try_resolve(&reply("Progress_Build_Response", "msg_p")));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_exception_reply_resolves_as_remote_error() {
        let table = Arc::new(PendingTable::new());
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                table.wait("msg_4", "Load", Duration::from_secs(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut msg = reply("Load_Response", "msg_4");
        msg.exception = Some(json!("file not found"));
        assert!(table.try_resolve(&msg));

        let err = waiter.await.expect("task").expect_err("remote error");
        assert!(matches!(err, CorrelationError::Remote(_)));
    }

    #[tokio::test]
    async fn test_reject_all_fails_every_waiter() {
        let table = Arc::new(PendingTable::new());
        let mut waiters = Vec::new();
        for i in 0..3 {
            let table = table.clone();
            waiters.push(tokio::spawn(async move {
                table
                    .wait(&format!("msg_{i}"), "X", Duration::from_secs(5))
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(table.len(), 3);
        table.reject_all();

        for waiter in waiters {
            let err = waiter.await.expect("task").expect_err("rejected");
            assert!(matches!(err, CorrelationError::ConnectionClosed));
        }
    }

    #[tokio::test]
    async fn test_resolve_ignores_unrelated_message() {
        let table = Arc::new(PendingTable::new());
        let _waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                table.wait("msg_5", "A", Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Wrong id.
        assert!(!table.try_resolve(&reply("A_Response", "msg_other")));
        // Wrong type.
        assert!(!table.try_resolve(&reply("B_Response", "msg_5")));
        // No id at all.
        assert!(!table.try_resolve(&Message::new("A_Response", json!(null))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_response_type_helper_matches_convention() {
        assert_eq!(response_type("Echo"), "Echo_Response");
    }
}
