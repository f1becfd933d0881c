//! Connection lifecycle listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::websocket::connection::Connection;

/// Callback run with the affected connection.
pub type ConnectionListener = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Handle returned by listener registration; pass it to `off` to remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Lifecycle point a listener fires on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// After the handshake, before `ready` is sent.
    Connection,
    /// After the connection closed and its subscriptions were discarded.
    Disconnection,
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Lifecycle, ConnectionListener)>>,
}

impl Listeners {
    pub(crate) fn on(&self, lifecycle: Lifecycle, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, lifecycle, listener));
        id
    }

    pub(crate) fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _, _)| *entry != id);
        entries.len() != before
    }

    /// Run every listener for `lifecycle` in registration order. The list
    /// is snapshotted first so listeners may register or remove listeners.
    pub(crate) fn fire(&self, lifecycle: Lifecycle, connection: &Arc<Connection>) {
        let snapshot: Vec<ConnectionListener> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, l, _)| *l == lifecycle)
            .map(|(_, _, f)| Arc::clone(f))
            .collect();
        for listener in snapshot {
            listener(connection);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
