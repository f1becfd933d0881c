//! Connection driver: handshake, call correlation, and event dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tether_core::{ClientFrame, DefinitionSet, ProtocolError, ServerFrame, SessionId};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::events::{EventListener, EventTable};
use crate::stub::NamespaceStub;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ReplySender = oneshot::Sender<Result<Value, ClientError>>;
type Pending = Arc<Mutex<HashMap<u64, ReplySender>>>;

/// Connection lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First connection reached `ready`.
    Connect,
    /// A reconnect reached `ready`.
    Reconnect,
    /// The connection closed.
    Disconnect,
    /// Connecting failed.
    Error(String),
    /// No `ready` within the connect timeout.
    Timeout(String),
}

/// Callback receiving [`ConnectionStatus`] changes.
pub type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
}

#[derive(Default)]
struct State {
    link: Option<Link>,
    session_id: Option<SessionId>,
    definitions: DefinitionSet,
    generation: u64,
}

pub(crate) struct Inner {
    config: ClientConfig,
    status: Option<StatusCallback>,
    state: Mutex<State>,
    pub(crate) events: Mutex<EventTable>,
    next_call_id: AtomicU64,
}

/// Handle to a server connection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url)
            .field("session_id", &self.session_id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Client {
    /// Connect and wait for `ready`.
    pub async fn connect(
        config: ClientConfig,
        status: Option<StatusCallback>,
    ) -> Result<Self, ClientError> {
        let state = State {
            session_id: config.session_id.clone(),
            ..State::default()
        };
        let client = Self {
            inner: Arc::new(Inner {
                config,
                status,
                state: Mutex::new(state),
                events: Mutex::new(EventTable::default()),
                next_call_id: AtomicU64::new(1),
            }),
        };
        client.open(ConnectionStatus::Connect).await?;
        Ok(client)
    }

    /// Drop the current connection, if any, and open a new one presenting
    /// the last session id. Every live subscription is re-issued.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.disconnect();
        self.open(ConnectionStatus::Reconnect).await
    }

    /// Close the connection. Pending calls fail with
    /// [`ClientError::Disconnected`]; local listeners are kept for a later
    /// [`Client::reconnect`].
    pub fn disconnect(&self) {
        let link = self.inner.state.lock().link.take();
        if let Some(link) = link {
            drop(link);
            info!(url = %self.inner.config.url, "disconnected");
            self.inner.notify(&ConnectionStatus::Disconnect);
        }
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().link.is_some()
    }

    /// Session assigned by the server in the last `ready` frame.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().session_id.clone()
    }

    /// Definition set received in the last `ready` frame.
    pub fn definitions(&self) -> DefinitionSet {
        self.inner.state.lock().definitions.clone()
    }

    /// Names of the namespaces the server exposes.
    pub fn namespaces(&self) -> Vec<String> {
        self.inner.state.lock().definitions.keys().cloned().collect()
    }

    /// Stub for `name`, if the server exposes it.
    pub fn namespace(&self, name: &str) -> Option<NamespaceStub> {
        let exists = self.inner.state.lock().definitions.contains_key(name);
        exists.then(|| NamespaceStub::new(self.clone(), name))
    }

    async fn open(&self, on_ready: ConnectionStatus) -> Result<(), ClientError> {
        let config = &self.inner.config;
        let session_id = self.session_id();
        let request = build_request(config, session_id.as_ref())?;

        let established = tokio::time::timeout(config.connect_timeout, establish(request)).await;
        let (ws, session_id, definitions) = match established {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                warn!(url = %config.url, error = %err, "connect failed");
                self.inner.notify(&ConnectionStatus::Error(err.to_string()));
                return Err(err);
            }
            Err(_) => {
                let message = format!("no ready frame within {:?}", config.connect_timeout);
                warn!(url = %config.url, "{message}");
                self.inner.notify(&ConnectionStatus::Timeout(message.clone()));
                return Err(ClientError::Timeout(message));
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending = Pending::default();
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.session_id = Some(session_id.clone());
            state.definitions = definitions;
            state.link = Some(Link {
                generation: state.generation,
                outbound: outbound.clone(),
                pending: Arc::clone(&pending),
            });
            state.generation
        };

        let live = self.inner.events.lock().subscriptions();
        for (event, query) in live {
            send_frame(&outbound, &ClientFrame::Subscribe { event, query });
        }
        drop(outbound);

        drop(tokio::spawn(drive(
            ws,
            outbound_rx,
            pending,
            Arc::downgrade(&self.inner),
            generation,
        )));

        info!(url = %config.url, %session_id, "connected");
        self.inner.notify(&on_ready);
        Ok(())
    }

    /// Issue a call and wait for its reply.
    pub(crate) async fn call_method(
        &self,
        method: String,
        args: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, method = %method, "call");
        let text = serde_json::to_string(&ClientFrame::Call { id, method, args })?;
        let (tx, rx) = oneshot::channel();
        {
            let state = self.inner.state.lock();
            let link = state.link.as_ref().ok_or_else(ClientError::not_connected)?;
            let _ = link.pending.lock().insert(id, tx);
            if link.outbound.send(text).is_err() {
                let _ = link.pending.lock().remove(&id);
                return Err(ClientError::not_connected());
            }
        }
        rx.await.unwrap_or(Err(ClientError::Disconnected))
    }

    /// Send a frame on the live connection. Without one the frame is
    /// skipped; subscriptions are re-issued on the next connect.
    pub(crate) fn send(&self, frame: &ClientFrame) {
        if let Some(link) = self.inner.state.lock().link.as_ref() {
            send_frame(&link.outbound, frame);
        }
    }

    pub(crate) fn attach_listener(
        &self,
        key: &str,
        query: Option<&Value>,
        listener: &EventListener,
    ) {
        let attached = self.inner.events.lock().attach(key, query, listener);
        if attached.needs_subscribe() {
            self.send(&ClientFrame::Subscribe {
                event: key.to_owned(),
                query: query.cloned(),
            });
        }
    }

    pub(crate) fn detach_listener(&self, key: &str, listener: &EventListener) {
        let emptied = self.inner.events.lock().detach(key, listener);
        if emptied {
            self.send(&ClientFrame::Unsubscribe {
                event: key.to_owned(),
            });
        }
    }
}

impl Inner {
    fn notify(&self, status: &ConnectionStatus) {
        if let Some(callback) = &self.status {
            callback(status);
        }
    }

    fn handle_frame(&self, text: &str, pending: &Pending) {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::Reply { id, error, result }) => {
                let Some(tx) = pending.lock().remove(&id) else {
                    debug!(id, "reply for unknown call");
                    return;
                };
                let outcome = match error {
                    Some(failure) => Err(ProtocolError::from_failure(failure).into()),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            Ok(ServerFrame::Event { event, data }) => {
                let listeners = self.events.lock().listeners(&event);
                for listener in listeners {
                    listener(&data);
                }
            }
            Ok(ServerFrame::Ready { .. }) => debug!("ignoring repeated ready"),
            Err(err) => warn!(error = %err, "unreadable server frame"),
        }
    }

    /// Called by a finished driver. Only the current link's end is a
    /// disconnect the application has not already seen.
    fn link_closed(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.link.as_ref().is_some_and(|l| l.generation == generation) {
            state.link = None;
            drop(state);
            info!(url = %self.config.url, "connection closed by server");
            self.notify(&ConnectionStatus::Disconnect);
        }
    }
}

fn send_frame(outbound: &mpsc::UnboundedSender<String>, frame: &ClientFrame) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            let _ = outbound.send(text);
        }
        Err(err) => warn!(error = %err, "failed to encode frame"),
    }
}

fn build_request(
    config: &ClientConfig,
    session_id: Option<&SessionId>,
) -> Result<Request, ClientError> {
    let mut request = config.url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    if let Some(id) = session_id {
        let cookie = format!("{}={}", config.cookie_name, id.as_str());
        let _ = headers.insert(header::COOKIE, header_value(&cookie)?);
    }
    if let Some(token) = &config.token {
        let bearer = format!("Bearer {token}");
        let _ = headers.insert(header::AUTHORIZATION, header_value(&bearer)?);
    }
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value).map_err(|e| ClientError::Transport(e.to_string()))
}

/// Open the socket and read up to the `ready` frame.
async fn establish(request: Request) -> Result<(WsStream, SessionId, DefinitionSet), ClientError> {
    let (mut ws, _response) = connect_async(request).await.map_err(connect_error)?;
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => match ServerFrame::parse(text.as_str())? {
                ServerFrame::Ready {
                    session_id,
                    namespaces,
                } => return Ok((ws, session_id, namespaces)),
                other => debug!(?other, "frame before ready"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ClientError::Transport("connection closed before ready".into()))
}

/// A refused handshake comes back as a plain 401 response.
fn connect_error(err: tungstenite::Error) -> ClientError {
    if let tungstenite::Error::Http(response) = &err {
        if response.status().as_u16() == 401 {
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let reason = body
                .strip_prefix("authorization rejected: ")
                .unwrap_or(&body)
                .to_owned();
            return ProtocolError::AuthRejected { reason }.into();
        }
    }
    err.into()
}

async fn drive(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    pending: Pending,
    inner: Weak<Inner>,
    generation: u64,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(err) = sink.send(Message::text(text)).await {
                        warn!(error = %err, "send failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.handle_frame(text.as_str(), &pending);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "receive failed");
                    break;
                }
            },
        }
    }

    // Close the queue before draining so no call can slip in afterwards.
    outbound.close();
    let orphaned: Vec<ReplySender> = pending.lock().drain().map(|(_, tx)| tx).collect();
    for tx in orphaned {
        let _ = tx.send(Err(ClientError::Disconnected));
    }
    if let Some(inner) = inner.upgrade() {
        inner.link_closed(generation);
    }
}
