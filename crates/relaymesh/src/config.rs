//! Server and client configuration.

use std::time::Duration;

use relaymesh_session::CookieJar;
use relaymesh_transfer::{DEFAULT_ACK_TIMEOUT, DEFAULT_CHUNK_SIZE};

/// Server-side settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Chunk size for outbound server-initiated transfers.
    pub chunk_size: u32,
    /// Patience for each transfer acknowledgement.
    pub transfer_ack_timeout: Duration,
    /// Timeout for server-initiated request/reply exchanges.
    pub reply_timeout: Duration,
    /// Session cookie handed to every client in the `Connected`
    /// handshake. Callers wanting a sealed cookie run the jar through a
    /// `CookieCipher` before placing it here.
    pub session_cookie: Option<CookieJar>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            transfer_ack_timeout: DEFAULT_ACK_TIMEOUT,
            reply_timeout: Duration::from_secs(30),
            session_cookie: None,
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for request/reply exchanges (and the handshake).
    pub reply_timeout: Duration,
    /// How often the heartbeat task wakes to inspect idle time.
    pub beat_check_interval: Duration,
    /// Idle time after which a heartbeat probe is sent.
    pub idle_threshold: Duration,
    /// Patience for the heartbeat's reply before the connection is
    /// declared dead.
    pub beat_reply_timeout: Duration,
    /// Reconnect attempts before giving up.
    pub retry_limit: u32,
    /// Fixed delay between reconnect attempts.
    pub backoff: Duration,
    /// Whether a lost connection is re-established automatically.
    pub auto_reconnect: bool,
    /// Chunk size for outbound transfers.
    pub chunk_size: u32,
    /// Patience for each transfer acknowledgement.
    pub transfer_ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(30),
            beat_check_interval: Duration::from_secs(1),
            idle_threshold: Duration::from_secs(100),
            beat_reply_timeout: Duration::from_secs(10),
            retry_limit: 5,
            backoff: Duration::from_secs(2),
            auto_reconnect: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            transfer_ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default_addr() {
        assert_eq!(ServerConfig::default().addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_client_config_defaults_match_documented_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.reply_timeout, Duration::from_secs(30));
        assert_eq!(cfg.idle_threshold, Duration::from_secs(100));
        assert_eq!(cfg.beat_reply_timeout, Duration::from_secs(10));
        assert_eq!(cfg.retry_limit, 5);
        assert_eq!(cfg.backoff, Duration::from_secs(2));
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.chunk_size, 4096);
    }
}
