//! Sessions and the session store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tether_core::SessionId;
use tracing::debug;

/// Attribute filter applied to sessions by filtered emissions.
pub type SessionFilter = Map<String, Value>;

/// A mutable attribute bag with an expiry, shared by every connection that
/// presented its identifier.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    attributes: RwLock<Map<String, Value>>,
    expires_at: Mutex<DateTime<Utc>>,
}

impl Session {
    /// A fresh session with no attributes that expires immediately until
    /// [`Session::touch`] is called.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            attributes: RwLock::new(Map::new()),
            expires_at: Mutex::new(Utc::now()),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Read one attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    /// Set one attribute, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.write().insert(key.into(), value)
    }

    /// Remove one attribute.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> Map<String, Value> {
        self.attributes.read().clone()
    }

    /// Whether every key/value pair of `filter` equals the session's
    /// attribute of the same name. An empty filter matches every session.
    pub fn matches(&self, filter: &SessionFilter) -> bool {
        let attributes = self.attributes.read();
        filter
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected))
    }

    /// Current expiry.
    pub fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.lock()
    }

    /// Whether the session has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Extend the expiry to `max_age` from now.
    pub fn touch(&self, max_age: Duration) {
        let delta = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let expires = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *self.expires_at.lock() = expires;
    }
}

/// Maps session identifiers to sessions.
///
/// Policy: a session may back any number of simultaneous connections.
/// Presenting the same identifier from several sockets (tabs, reconnects
/// that overlap the old socket's teardown) binds them all to one attribute
/// bag. The store never owns connection lifetimes.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a presented identifier to a live session, creating a new one
    /// (with a fresh identifier) when the presented one is absent, unknown,
    /// or expired. Returns the session and whether it was created.
    pub fn resolve(&self, presented: Option<&SessionId>) -> (Arc<Session>, bool) {
        if let Some(session) = presented.and_then(|id| self.get(id)) {
            return (session, false);
        }
        let session = Arc::new(Session::new(SessionId::new()));
        let _ = self
            .sessions
            .insert(session.id().clone(), Arc::clone(&session));
        debug!(session_id = %session.id(), "session created");
        (session, true)
    }

    /// Look up a live session. Expired entries are removed on access.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        if session.is_expired_at(Utc::now()) {
            let _ = self.sessions.remove(id);
            debug!(session_id = %id, "session expired");
            return None;
        }
        Some(session)
    }

    /// Remove a session.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Drop every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Drop every session.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
