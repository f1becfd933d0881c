//! Event addressing: `namespace.event` with an optional `#id` suffix.
//!
//! The base key names the logical stream; the suffix distinguishes several
//! filtered subscriptions to the same stream on one connection.

use std::fmt;

use crate::errors::ProtocolError;

const SUFFIX_SEPARATOR: char = '#';

/// A parsed event key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    full: String,
    base_len: usize,
    namespace_len: usize,
}

impl EventKey {
    /// Parse `ns.event` or `ns.event#id`.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let base = raw.split(SUFFIX_SEPARATOR).next().unwrap_or(raw);
        let invalid = || ProtocolError::InvalidFrame {
            message: format!("malformed event key '{raw}'"),
        };
        let (namespace, event) = base.split_once('.').ok_or_else(invalid)?;
        if namespace.is_empty() || event.is_empty() {
            return Err(invalid());
        }
        if raw.len() == base.len() + 1 {
            // Trailing '#' with nothing after it.
            return Err(invalid());
        }
        Ok(Self {
            full: raw.to_owned(),
            base_len: base.len(),
            namespace_len: namespace.len(),
        })
    }

    /// Build a key from its parts.
    pub fn compose(namespace: &str, event: &str, suffix: Option<&str>) -> Self {
        let mut full = format!("{namespace}.{event}");
        let base_len = full.len();
        if let Some(suffix) = suffix {
            full.push(SUFFIX_SEPARATOR);
            full.push_str(suffix);
        }
        Self {
            full,
            base_len,
            namespace_len: namespace.len(),
        }
    }

    /// Full key, suffix included.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// `namespace.event` without the suffix.
    pub fn base(&self) -> &str {
        &self.full[..self.base_len]
    }

    /// The disambiguating suffix, if any.
    pub fn suffix(&self) -> Option<&str> {
        (self.full.len() > self.base_len).then(|| &self.full[self.base_len + 1..])
    }

    /// Namespace part.
    pub fn namespace(&self) -> &str {
        &self.full[..self.namespace_len]
    }

    /// Event name part.
    pub fn event(&self) -> &str {
        &self.full[self.namespace_len + 1..self.base_len]
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_key() {
        let key = EventKey::parse("myApi.event4").unwrap();
        assert_eq!(key.base(), "myApi.event4");
        assert_eq!(key.namespace(), "myApi");
        assert_eq!(key.event(), "event4");
        assert!(key.suffix().is_none());
    }

    #[test]
    fn parse_suffixed_key() {
        let key = EventKey::parse("myApi.event4#2").unwrap();
        assert_eq!(key.base(), "myApi.event4");
        assert_eq!(key.suffix(), Some("2"));
        assert_eq!(key.as_str(), "myApi.event4#2");
    }

    #[test]
    fn event_names_may_contain_dots() {
        let key = EventKey::parse("ns.a.b").unwrap();
        assert_eq!(key.namespace(), "ns");
        assert_eq!(key.event(), "a.b");
    }

    #[test]
    fn rejects_malformed_keys() {
        for raw in ["noDot", ".event", "ns.", "ns.event#", "#1"] {
            assert!(EventKey::parse(raw).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn compose_matches_parse() {
        let composed = EventKey::compose("myApi", "event4", Some("1"));
        assert_eq!(composed, EventKey::parse("myApi.event4#1").unwrap());
        let plain = EventKey::compose("myApi", "event4", None);
        assert_eq!(plain.to_string(), "myApi.event4");
    }
}
