//! Error types for session handling.

/// Errors that can occur while handling session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A cookie string could not be decoded.
    #[error("malformed cookie string: {0}")]
    MalformedCookie(String),

    /// A cipher failed to seal or open the cookie string.
    #[error("cipher failure: {0}")]
    Cipher(String),
}
