//! `GET /health`: liveness plus a snapshot of the server's counters.

use serde::Serialize;

use crate::server::Shared;

/// Body of the `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`; an unhealthy server does not answer.
    pub status: &'static str,
    /// Seconds since the server context was created.
    pub uptime_secs: u64,
    /// Live connections.
    pub connections: usize,
    /// Stored sessions, expired ones included until the next sweep.
    pub sessions: usize,
    /// Registered namespaces.
    pub namespaces: usize,
}

impl HealthResponse {
    pub(crate) fn snapshot(shared: &Shared) -> Self {
        Self {
            status: "ok",
            uptime_secs: shared.uptime().as_secs(),
            connections: shared.hub.connection_count(),
            sessions: shared.sessions.len(),
            namespaces: shared.registry.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Namespace;
    use crate::server::ApiServer;
    use tether_settings::TetherSettings;

    #[test]
    fn empty_server_is_healthy() {
        let server = ApiServer::new(TetherSettings::default());
        let health = HealthResponse::snapshot(server.shared());
        assert_eq!(health.status, "ok");
        assert_eq!(health.namespaces, 0);
        assert_eq!(health.connections, 0);
        assert!(health.uptime_secs < 2);
    }

    #[test]
    fn snapshot_counts_state() {
        let server = ApiServer::new(TetherSettings::default());
        let _ = server.register(Namespace::builder("a").build().unwrap());
        let _ = server.register(Namespace::builder("b").build().unwrap());
        let _ = server.sessions().resolve(None);

        let value = serde_json::to_value(HealthResponse::snapshot(server.shared())).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["sessions"], 1);
        assert_eq!(value["namespaces"], 2);
        assert!(value["uptime_secs"].is_number());
    }
}
