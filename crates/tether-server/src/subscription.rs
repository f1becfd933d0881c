//! Per-connection subscription sets.

use serde_json::Value;
use tether_core::{EventKey, Query};

/// One interest registration on a connection.
#[derive(Clone, Debug)]
pub struct Subscription {
    key: EventKey,
    query: Option<Query>,
}

impl Subscription {
    /// Full key (suffix included) that deliveries are labelled with.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Compiled predicate, if filtered.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Whether this subscription receives `payload` emitted on `base`.
    pub fn accepts(&self, base: &str, payload: &Value) -> bool {
        self.key.base() == base && self.query.as_ref().is_none_or(|q| q.matches(payload))
    }
}

/// Result of adding a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new entry was appended.
    Added,
    /// An identical unfiltered entry already existed; nothing changed.
    AlreadySubscribed,
    /// An entry with the same key was replaced in place.
    Replaced,
}

/// Ordered subscriptions of one connection.
///
/// Unfiltered entries are keyed by base event key, at most one each.
/// Filtered entries are keyed by their full suffixed key. Delivery order is
/// registration order.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. An unfiltered subscription is stored under the
    /// base key regardless of any suffix on `key`.
    pub fn subscribe(&mut self, key: EventKey, query: Option<Query>) -> SubscribeOutcome {
        let key = match &query {
            Some(_) => key,
            None => EventKey::compose(key.namespace(), key.event(), None),
        };
        let existing = self
            .entries
            .iter_mut()
            .find(|s| s.key.as_str() == key.as_str());
        match existing {
            Some(entry) if entry.query.is_none() && query.is_none() => {
                SubscribeOutcome::AlreadySubscribed
            }
            Some(entry) => {
                entry.query = query;
                SubscribeOutcome::Replaced
            }
            None => {
                self.entries.push(Subscription { key, query });
                SubscribeOutcome::Added
            }
        }
    }

    /// Remove the subscription whose full key equals `key`.
    pub fn unsubscribe(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.key.as_str() != key);
        self.entries.len() != before
    }

    /// Subscriptions that accept `payload` emitted on `base`, in
    /// registration order.
    pub fn matching<'a>(
        &'a self,
        base: &'a str,
        payload: &'a Value,
    ) -> impl Iterator<Item = &'a Subscription> + 'a {
        self.entries.iter().filter(move |s| s.accepts(base, payload))
    }

    /// Full keys, in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|s| s.key.as_str().to_string()).collect()
    }

    /// Drop everything, returning how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
