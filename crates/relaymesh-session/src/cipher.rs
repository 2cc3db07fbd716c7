//! Pluggable obfuscation for the session cookie string.
//!
//! The jar's encoded form passes through a [`CookieCipher`] before it
//! leaves the process, letting deployments substitute a real cipher
//! without touching the jar itself. The default is a passthrough.

use crate::SessionError;

/// Transforms the encoded cookie string on its way to and from storage.
pub trait CookieCipher: Send + Sync {
    /// Encrypts (or otherwise encodes) the plain cookie string.
    fn seal(&self, plain: &str) -> Result<String, SessionError>;

    /// Reverses [`seal`](CookieCipher::seal).
    fn open(&self, sealed: &str) -> Result<String, SessionError>;
}

/// The identity cipher: stores the cookie string as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl CookieCipher for PassthroughCipher {
    fn seal(&self, plain: &str) -> Result<String, SessionError> {
        Ok(plain.to_string())
    }

    fn open(&self, sealed: &str) -> Result<String, SessionError> {
        Ok(sealed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_seal_open_is_identity() {
        let cipher = PassthroughCipher;
        let sealed = cipher.seal("a=1&b=2").expect("seal");
        assert_eq!(sealed, "a=1&b=2");
        assert_eq!(cipher.open(&sealed).expect("open"), "a=1&b=2");
    }
}
