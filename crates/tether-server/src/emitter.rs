//! Server-side event emission.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tether_core::EventKey;
use tracing::warn;

use crate::session::SessionFilter;
use crate::websocket::hub::ConnectionHub;

/// Emits events for one namespace. Cheap to clone; operations capture it
/// to emit from inside their bodies.
#[derive(Clone)]
pub struct NamespaceHandle {
    namespace: Arc<str>,
    hub: Arc<ConnectionHub>,
}

impl NamespaceHandle {
    pub(crate) fn new(namespace: &str, hub: Arc<ConnectionHub>) -> Self {
        Self {
            namespace: namespace.into(),
            hub,
        }
    }

    /// Namespace this handle emits on.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deliver `payload` on `event` to every subscribed connection.
    /// Returns the number of frames queued.
    pub fn emit(&self, event: &str, payload: impl Serialize) -> usize {
        self.route(event, payload, None)
    }

    /// Deliver `payload` on `event` only to connections whose session
    /// attributes equal every pair in `filter`.
    pub fn emit_to(&self, event: &str, payload: impl Serialize, filter: &SessionFilter) -> usize {
        self.route(event, payload, Some(filter))
    }

    fn route(&self, event: &str, payload: impl Serialize, filter: Option<&SessionFilter>) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(namespace = %self.namespace, event, error = %e, "failed to serialize event payload");
                return 0;
            }
        };
        let key = EventKey::compose(&self.namespace, event, None);
        self.hub.emit(key.base(), &payload, filter)
    }
}

impl std::fmt::Debug for NamespaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceHandle")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Build a session filter from a JSON object literal. Non-objects yield an
/// empty filter, which matches every session.
pub fn session_filter(value: Value) -> SessionFilter {
    match value {
        Value::Object(map) => map,
        _ => SessionFilter::new(),
    }
}
