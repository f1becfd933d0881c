//! `ApiServer`: the server context and its Axum routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use tether_core::{DefinitionSet, SessionId};
use tether_settings::TetherSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{
    AllowAll, Authorizer, Credentials, handshake, session_from_cookie_header, set_cookie_value,
};
use crate::emitter::NamespaceHandle;
use crate::errors::ServerError;
use crate::health::HealthResponse;
use crate::listeners::{Lifecycle, ListenerId, Listeners};
use crate::registry::{Namespace, Registry};
use crate::session::SessionStore;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::Connection;
use crate::websocket::hub::ConnectionHub;
use crate::websocket::socket::run_connection;

pub(crate) struct Shared {
    pub(crate) settings: TetherSettings,
    pub(crate) registry: Arc<Registry>,
    pub(crate) sessions: SessionStore,
    pub(crate) hub: Arc<ConnectionHub>,
    pub(crate) listeners: Listeners,
    authorizer: Arc<dyn Authorizer>,
    start_time: Instant,
}

impl Shared {
    pub(crate) fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// The server context: namespace registry, session store, connection hub,
/// authorizer, and lifecycle listeners.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct ApiServer {
    shared: Arc<Shared>,
}

impl ApiServer {
    /// Server that accepts every handshake.
    pub fn new(settings: TetherSettings) -> Self {
        Self::with_authorizer(settings, AllowAll)
    }

    /// Server with an authorization hook.
    pub fn with_authorizer(settings: TetherSettings, authorizer: impl Authorizer + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                registry: Arc::new(Registry::new()),
                sessions: SessionStore::new(),
                hub: Arc::new(ConnectionHub::new()),
                listeners: Listeners::default(),
                authorizer: Arc::new(authorizer),
                start_time: Instant::now(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Settings this server was built with.
    pub fn settings(&self) -> &TetherSettings {
        &self.shared.settings
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a namespace, replacing any previous one of the same name.
    /// Connections opened afterwards see it in their `ready` frame.
    pub fn register(&self, namespace: Namespace) -> NamespaceHandle {
        let handle = self.namespace_handle(namespace.name());
        let name = namespace.name().to_string();
        let members = namespace.definition().len();
        let replaced = self.shared.registry.register(namespace).is_some();
        info!(namespace = %name, members, replaced, "namespace registered");
        handle
    }

    /// Remove a namespace.
    pub fn unregister(&self, name: &str) -> bool {
        self.shared.registry.unregister(name).is_some()
    }

    /// Whether a namespace is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.registry.is_registered(name)
    }

    /// A registered namespace.
    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.shared.registry.get(name)
    }

    /// The definition set sent in `ready` frames.
    pub fn definitions(&self) -> DefinitionSet {
        self.shared.registry.definitions()
    }

    /// Emission handle for `name`. Usable before the namespace is
    /// registered, so operations can capture it.
    pub fn namespace_handle(&self, name: &str) -> NamespaceHandle {
        NamespaceHandle::new(name, Arc::clone(&self.shared.hub))
    }

    // ── Sessions and connections ────────────────────────────────────

    /// The session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.shared.sessions
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.hub.connection_count()
    }

    /// Live connections bound to a session.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<Connection>> {
        self.shared.hub.session_connections(session_id)
    }

    /// Run `listener` for every new connection, after the handshake and
    /// before `ready` is sent.
    pub fn on_connection(
        &self,
        listener: impl Fn(&Arc<Connection>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .on(Lifecycle::Connection, Arc::new(listener))
    }

    /// Run `listener` after a connection closes.
    pub fn on_disconnection(
        &self,
        listener: impl Fn(&Arc<Connection>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .on(Lifecycle::Disconnection, Arc::new(listener))
    }

    /// Remove a lifecycle listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners.off(id)
    }

    // ── Serving ─────────────────────────────────────────────────────

    /// Axum router exposing `/ws` and `/health`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `addr` and start serving.
    pub async fn start(&self, addr: &str) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        self.serve(listener)
    }

    /// Bind the host and port from settings and start serving.
    pub async fn start_from_settings(&self) -> Result<ServerHandle, ServerError> {
        let server = &self.shared.settings.server;
        let addr = format!("{}:{}", server.host, server.port);
        self.start(&addr).await
    }

    /// Serve on an already-bound listener.
    pub fn serve(&self, listener: TcpListener) -> Result<ServerHandle, ServerError> {
        let local_addr = listener.local_addr()?;
        let shutdown = ShutdownCoordinator::new();

        let router = self.router();
        let token = shutdown.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });

        let sweeper = spawn_session_sweeper(
            Arc::clone(&self.shared),
            self.shared.settings.session.sweep_interval(),
            shutdown.token(),
        );

        info!(%local_addr, "tether server started");
        Ok(ServerHandle {
            local_addr,
            shutdown,
            tasks: vec![server, sweeper],
            api: self.clone(),
        })
    }

    /// Close every connection and clear the registry, session store, and
    /// lifecycle listeners.
    pub fn reset(&self) {
        let closed = self.shared.hub.close_all();
        self.shared.registry.clear();
        self.shared.sessions.clear();
        self.shared.listeners.clear();
        info!(closed, "server state cleared");
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    tasks: Vec<JoinHandle<()>>,
    api: ApiServer,
}

impl ServerHandle {
    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// WebSocket URL a local client can connect to.
    pub fn ws_url(&self) -> String {
        let host = if self.local_addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            self.local_addr.ip().to_string()
        };
        format!("ws://{host}:{}/ws", self.port())
    }

    /// The server context this handle serves.
    pub fn api(&self) -> &ApiServer {
        &self.api
    }

    /// Stop accepting, close every connection, and clear the registry and
    /// session store.
    pub async fn stop(self) {
        let closed = self.api.shared.hub.close_all();
        info!(closed, "stopping tether server");
        self.shutdown
            .graceful_shutdown(self.tasks, None)
            .await;
        self.api.reset();
    }
}

fn spawn_session_sweeper(
    shared: Arc<Shared>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = shared.sessions.purge_expired();
                    if removed > 0 {
                        info!(removed, "purged expired sessions");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}

/// Credentials from the upgrade request: the session cookie and an
/// optional bearer token.
fn credentials_from_headers(headers: &HeaderMap, cookie_name: &str) -> Credentials {
    let session_id = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| session_from_cookie_header(v, cookie_name));
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    Credentials { session_id, token }
}

/// GET /ws: handshake, then upgrade. Refused handshakes answer 401 before
/// the upgrade request itself is validated.
async fn ws_handler(
    State(server): State<ApiServer>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let shared = Arc::clone(&server.shared);
    let session_settings = &shared.settings.session;
    let credentials = credentials_from_headers(&headers, &session_settings.cookie_name);
    let session = match handshake(
        &shared.sessions,
        shared.authorizer.as_ref(),
        &credentials,
        session_settings.max_age(),
    )
    .await
    {
        Ok(session) => session,
        Err(err) => return (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let cookie = set_cookie_value(
        &session_settings.cookie_name,
        session.id(),
        session_settings.max_age(),
    );
    let socket_shared = Arc::clone(&shared);
    let mut response = ws.on_upgrade(move |socket| run_connection(socket, socket_shared, session));
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            let _ = response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "session cookie is not a valid header value"),
    }
    response
}

/// GET /health
async fn health_handler(State(server): State<ApiServer>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(server.shared()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Rejection, encode_session_cookie};
    use crate::session::Session;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    struct DenyAll;

    #[async_trait]
    impl Authorizer for DenyAll {
        async fn authorize(&self, _: &Session, _: &Credentials) -> Result<(), Rejection> {
            Err(Rejection::new("closed for maintenance"))
        }
    }

    fn make_server() -> ApiServer {
        ApiServer::new(TetherSettings::default())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let server = make_server();
        let _ = server.register(Namespace::builder("a").build().unwrap());
        let _ = server.sessions().resolve(None);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["sessions"], 1);
        assert_eq!(parsed["namespaces"], 1);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejected_handshake_answers_401() {
        let server = ApiServer::with_authorizer(TetherSettings::default(), DenyAll);
        let req = Request::builder()
            .uri("/ws")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn credentials_read_cookie_and_bearer() {
        let id = SessionId::new();
        let mut headers = HeaderMap::new();
        let cookie = format!("a=1; tether-session={}", encode_session_cookie(&id));
        let _ = headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let creds = credentials_from_headers(&headers, "tether-session");
        assert_eq!(creds.session_id, Some(id));
        assert_eq!(creds.token.as_deref(), Some("abc"));

        let creds = credentials_from_headers(&HeaderMap::new(), "tether-session");
        assert!(creds.session_id.is_none() && creds.token.is_none());
    }

    #[test]
    fn register_and_reset() {
        let server = make_server();
        let handle = server.register(
            Namespace::builder("myApi")
                .constant("CONSTANT", json!(42))
                .build()
                .unwrap(),
        );
        assert_eq!(handle.namespace(), "myApi");
        assert!(server.is_registered("myApi"));
        assert!(server.definitions()["myApi"].contains_key("CONSTANT"));
        let _ = server.sessions().resolve(None);

        server.reset();
        assert!(!server.is_registered("myApi"));
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn lifecycle_listener_registration() {
        let server = make_server();
        let id = server.on_connection(|_| {});
        let other = server.on_disconnection(|_| {});
        assert_ne!(id, other);
        assert!(server.off(id));
        assert!(!server.off(id));
    }

    #[test]
    fn reset_drops_lifecycle_listeners() {
        let server = make_server();
        let id = server.on_connection(|_| {});
        server.reset();
        assert!(!server.off(id));
    }

    #[tokio::test]
    async fn start_and_stop() {
        let server = make_server();
        let _ = server.register(Namespace::builder("a").build().unwrap());
        let handle = server.start("127.0.0.1:0").await.unwrap();
        assert_ne!(handle.port(), 0);
        assert!(handle.ws_url().starts_with("ws://127.0.0.1:"));
        handle.stop().await;
        assert!(!server.is_registered("a"));
    }
}
