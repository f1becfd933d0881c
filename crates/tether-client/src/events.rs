//! Local event listeners, keyed by full event key.
//!
//! Several local listeners may share one server-side subscription. The
//! table reports when a key gains its first listener or loses its last one
//! so the caller knows when to send subscribe and unsubscribe frames.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Callback run with each delivered payload.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    query: Option<Value>,
    listeners: Vec<EventListener>,
}

/// Result of attaching a listener to a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Attached {
    /// First listener for the key.
    New,
    /// The key existed and its query changed.
    QueryChanged,
    /// Added beside existing listeners.
    Joined,
    /// The same listener was already attached.
    Duplicate,
}

impl Attached {
    /// Whether the server must be told about the subscription.
    pub(crate) fn needs_subscribe(self) -> bool {
        matches!(self, Self::New | Self::QueryChanged)
    }
}

#[derive(Default)]
pub(crate) struct EventTable {
    entries: HashMap<String, Entry>,
}

fn same_listener(a: &EventListener, b: &EventListener) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl EventTable {
    pub(crate) fn attach(
        &mut self,
        key: &str,
        query: Option<&Value>,
        listener: &EventListener,
    ) -> Attached {
        match self.entries.get_mut(key) {
            None => {
                let _ = self.entries.insert(
                    key.to_owned(),
                    Entry {
                        query: query.cloned(),
                        listeners: vec![Arc::clone(listener)],
                    },
                );
                Attached::New
            }
            Some(entry) => {
                let changed = entry.query.as_ref() != query;
                if changed {
                    entry.query = query.cloned();
                }
                if entry.listeners.iter().any(|l| same_listener(l, listener)) {
                    return if changed {
                        Attached::QueryChanged
                    } else {
                        Attached::Duplicate
                    };
                }
                entry.listeners.push(Arc::clone(listener));
                if changed {
                    Attached::QueryChanged
                } else {
                    Attached::Joined
                }
            }
        }
    }

    /// Detach `listener` from `key`. Returns `true` when the key lost its
    /// last listener.
    pub(crate) fn detach(&mut self, key: &str, listener: &EventListener) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|l| !same_listener(l, listener));
        if entry.listeners.len() == before || !entry.listeners.is_empty() {
            return false;
        }
        let _ = self.entries.remove(key);
        true
    }

    /// Snapshot of the listeners for `key`.
    pub(crate) fn listeners(&self, key: &str) -> Vec<EventListener> {
        self.entries
            .get(key)
            .map(|e| e.listeners.clone())
            .unwrap_or_default()
    }

    /// Every live key with its query, for re-subscribing after a reconnect.
    pub(crate) fn subscriptions(&self) -> Vec<(String, Option<Value>)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.query.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listener() -> EventListener {
        Arc::new(|_: &Value| {})
    }

    #[test]
    fn first_listener_subscribes() {
        let mut table = EventTable::default();
        let a = listener();
        assert_eq!(table.attach("api.n", None, &a), Attached::New);
        assert!(Attached::New.needs_subscribe());
        assert!(table.contains("api.n"));
    }

    #[test]
    fn same_listener_is_kept_once() {
        let mut table = EventTable::default();
        let a = listener();
        let _ = table.attach("api.n", None, &a);
        assert_eq!(table.attach("api.n", None, &a), Attached::Duplicate);
        assert_eq!(table.listeners("api.n").len(), 1);
    }

    #[test]
    fn last_detach_reports_empty_key() {
        let mut table = EventTable::default();
        let (a, b) = (listener(), listener());
        let _ = table.attach("api.n", None, &a);
        assert_eq!(table.attach("api.n", None, &b), Attached::Joined);
        assert!(!table.detach("api.n", &a));
        assert!(table.contains("api.n"));
        assert!(table.detach("api.n", &b));
        assert!(!table.contains("api.n"));
        assert!(!table.detach("api.n", &b));
    }

    #[test]
    fn detaching_unknown_listener_keeps_key() {
        let mut table = EventTable::default();
        let a = listener();
        let _ = table.attach("api.n", None, &a);
        assert!(!table.detach("api.n", &listener()));
        assert_eq!(table.listeners("api.n").len(), 1);
    }

    #[test]
    fn new_query_resubscribes() {
        let mut table = EventTable::default();
        let a = listener();
        let q1 = json!({"$gte": 0});
        let q2 = json!({"$lte": 0});
        let _ = table.attach("api.n#f", Some(&q1), &a);
        assert_eq!(table.attach("api.n#f", Some(&q2), &a), Attached::QueryChanged);
        assert_eq!(table.subscriptions(), vec![("api.n#f".to_string(), Some(q2))]);
    }
}
