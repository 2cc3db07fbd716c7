//! Session cookie jar.
//!
//! Session state rides in a compact `key=value&key=value` string with
//! URL-encoded keys and values. [`CookieJar`] parses, mutates, and
//! re-serializes that string deterministically (keys sorted), so two
//! jars with the same contents always encode identically.

use std::collections::BTreeMap;

use crate::SessionError;

/// A parsed set of session cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: BTreeMap<String, String>,
}

impl CookieJar {
    /// Creates an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `key=value&key=value` cookie string.
    ///
    /// Entries without an `=` are treated as keys with an empty value.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let mut entries = BTreeMap::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let key = urlencoding::decode(key)
                .map_err(|e| SessionError::MalformedCookie(e.to_string()))?;
            let value = urlencoding::decode(value)
                .map_err(|e| SessionError::MalformedCookie(e.to_string()))?;
            entries.insert(key.into_owned(), value.into_owned());
        }
        Ok(Self { entries })
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Returns `true` when the jar holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in the jar.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serializes the jar back to `key=value&key=value` form.
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pairs() {
        let jar = CookieJar::parse("a=1&b=2").expect("parse");
        assert_eq!(jar.get("a"), Some("1"));
        assert_eq!(jar.get("b"), Some("2"));
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_parse_empty_string_gives_empty_jar() {
        let jar = CookieJar::parse("").expect("parse");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_parse_key_without_value() {
        let jar = CookieJar::parse("flag").expect("parse");
        assert_eq!(jar.get("flag"), Some(""));
    }

    #[test]
    fn test_encode_is_sorted_and_stable() {
        let mut jar = CookieJar::new();
        jar.set("zeta", "1");
        jar.set("alpha", "2");
        assert_eq!(jar.encode(), "alpha=2&zeta=1");
    }

    #[test]
    fn test_round_trip_with_reserved_characters() {
        let mut jar = CookieJar::new();
        jar.set("token", "a=b&c d");
        let parsed = CookieJar::parse(&jar.encode()).expect("parse");
        assert_eq!(parsed.get("token"), Some("a=b&c d"));
    }

    #[test]
    fn test_set_overwrites_and_remove_returns_old() {
        let mut jar = CookieJar::new();
        jar.set("k", "old");
        jar.set("k", "new");
        assert_eq!(jar.remove("k"), Some("new".to_string()));
        assert_eq!(jar.get("k"), None);
    }
}
