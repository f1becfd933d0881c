//! Live duplex connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{ConnectionId, EventKey, Query, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::Session;
use crate::subscription::{SubscribeOutcome, SubscriptionSet};

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, `ready` not yet queued.
    Connecting,
    /// Dispatching calls and receiving events.
    Ready,
    /// Terminal. Subscriptions are gone and nothing more is sent.
    Closed,
}

/// One live client connection bound to one session.
pub struct Connection {
    id: ConnectionId,
    session: Arc<Session>,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<SubscriptionSet>,
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl Connection {
    /// New connection in the `Connecting` state.
    pub fn new(session: Arc<Session>, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session,
            state: Mutex::new(ConnectionState::Connecting),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Session this connection is bound to.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Move `Connecting` to `Ready`. No-op in any other state.
    pub fn mark_ready(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Ready;
            true
        } else {
            false
        }
    }

    /// Close the connection: discard subscriptions and signal the socket
    /// tasks. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closed;
        }
        let discarded = self.subscriptions.lock().clear();
        self.closed.cancel();
        debug!(conn_id = %self.id, discarded, "connection closed");
        true
    }

    /// Token cancelled when the connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Queue a raw text frame.
    ///
    /// Returns `false` when the connection is closed or the queue is full;
    /// a full queue counts toward [`Connection::drop_count`].
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize and queue a frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize frame");
                false
            }
        }
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Add a subscription. Ignored once closed.
    pub fn subscribe(&self, key: EventKey, query: Option<Query>) -> Option<SubscribeOutcome> {
        if self.is_closed() {
            return None;
        }
        Some(self.subscriptions.lock().subscribe(key, query))
    }

    /// Remove the subscription with exactly this key.
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.subscriptions.lock().unsubscribe(key)
    }

    /// Full keys of current subscriptions, in registration order.
    pub fn subscription_keys(&self) -> Vec<String> {
        self.subscriptions.lock().keys()
    }

    /// Queue one `event` frame per subscription that accepts `payload`
    /// emitted on `base`, in registration order. Returns
    /// `(delivered, dropped)`.
    pub fn deliver(&self, base: &str, payload: &Value) -> (usize, usize) {
        if self.state() != ConnectionState::Ready {
            return (0, 0);
        }
        let frames: Vec<ServerFrame> = self
            .subscriptions
            .lock()
            .matching(base, payload)
            .map(|s| ServerFrame::Event {
                event: s.key().as_str().to_string(),
                data: payload.clone(),
            })
            .collect();
        let mut delivered = 0;
        let mut dropped = 0;
        for frame in &frames {
            if self.send_frame(frame) {
                delivered += 1;
            } else {
                dropped += 1;
            }
        }
        (delivered, dropped)
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("session", self.session.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
