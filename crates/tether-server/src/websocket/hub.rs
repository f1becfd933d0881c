//! Connection table and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde_json::Value;
use tether_core::{ConnectionId, SessionId};
use tracing::{debug, warn};

use super::connection::Connection;
use crate::metrics::{CONNECTIONS_ACTIVE, EVENTS_DELIVERED_TOTAL, SEND_DROPS_TOTAL};
use crate::session::SessionFilter;

/// Lifetime drops after which a slow client is disconnected.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Every live connection, indexed by id.
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    active_count: AtomicUsize,
}

impl ConnectionHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<Connection>) {
        let mut conns = self.connections.write();
        if conns.insert(connection.id().clone(), connection).is_none() {
            record_active(self.active_count.fetch_add(1, Ordering::Relaxed) + 1);
        }
    }

    /// Remove a connection by id.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            record_active(self.active_count.fetch_sub(1, Ordering::Relaxed) - 1);
        }
        removed
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Connections bound to a session.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.session().id() == session_id)
            .cloned()
            .collect()
    }

    /// Close and remove every connection, returning how many there were.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut conns = self.connections.write();
            conns.drain().map(|(_, c)| c).collect()
        };
        self.active_count.store(0, Ordering::Relaxed);
        record_active(0);
        for conn in &drained {
            let _ = conn.close();
        }
        drained.len()
    }

    /// Deliver `payload` emitted on `base` (`ns.event`) to every connection
    /// whose session satisfies `session_filter`, once per satisfied
    /// subscription. Slow clients past [`MAX_TOTAL_DROPS`] are closed and
    /// removed. Returns the number of frames queued.
    pub fn emit(&self, base: &str, payload: &Value, session_filter: Option<&SessionFilter>) -> usize {
        let mut to_remove = Vec::new();
        let mut delivered = 0;
        {
            let conns = self.connections.read();
            for conn in conns.values() {
                if session_filter.is_some_and(|f| !conn.session().matches(f)) {
                    continue;
                }
                let (sent, dropped) = conn.deliver(base, payload);
                delivered += sent;
                if dropped > 0 {
                    counter!(SEND_DROPS_TOTAL).increment(dropped as u64);
                    let drops = conn.drop_count();
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(conn_id = %conn.id(), event = base, drops, "disconnecting slow client");
                        to_remove.push(conn.id().clone());
                    } else {
                        warn!(conn_id = %conn.id(), event = base, total_drops = drops, "failed to send event to client (queue full)");
                    }
                }
            }
        }
        for id in &to_remove {
            if let Some(conn) = self.remove(id) {
                let _ = conn.close();
            }
        }
        counter!(EVENTS_DELIVERED_TOTAL).increment(delivered as u64);
        debug!(event = base, delivered, filtered = session_filter.is_some(), "emitted event");
        delivered
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(n: usize) {
    gauge!(CONNECTIONS_ACTIVE).set(n as f64);
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}
