//! Per-connection socket loop: writer task, heartbeat, and in-order reader.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tether_core::ServerFrame;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use super::connection::Connection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::listeners::Lifecycle;
use crate::server::Shared;
use crate::session::Session;

/// Drive one accepted socket from `ready` to teardown.
pub(crate) async fn run_connection(socket: WebSocket, shared: Arc<Shared>, session: Arc<Session>) {
    let transport = &shared.settings.server;
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(transport.max_send_queue.max(1));
    let conn = Arc::new(Connection::new(session, tx));
    shared.hub.add(Arc::clone(&conn));
    info!(conn_id = %conn.id(), session_id = %conn.session().id(), "client connected");

    shared.listeners.fire(Lifecycle::Connection, &conn);
    let ready = ServerFrame::Ready {
        session_id: conn.session().id().clone(),
        namespaces: shared.registry.definitions(),
    };
    let _ = conn.send_frame(&ready);
    let _ = conn.mark_ready();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let closed = conn.closed_token();

    // Writer task: drain the outbound queue and send periodic pings.
    let writer_conn = Arc::clone(&conn);
    let writer_closed = closed.clone();
    let heartbeat_interval = transport.heartbeat_interval();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        let _ = ping_interval.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_conn.id(), "sent ping");
                }
                () = writer_closed.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = writer_conn.close();
    });

    let heartbeat_conn = Arc::clone(&conn);
    let heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&conn),
        heartbeat_interval,
        transport.client_timeout(),
        closed.clone(),
    ));
    let watchdog = tokio::spawn(async move {
        if heartbeat.await.ok() == Some(HeartbeatResult::TimedOut) {
            warn!(conn_id = %heartbeat_conn.id(), "client stopped answering pings");
            let _ = heartbeat_conn.close();
        }
    });

    // Reader: frames are handled in arrival order on this task.
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    conn.mark_alive();
                    handle_message(text.as_str(), &conn, &shared.registry);
                }
                Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = closed.cancelled() => break,
        }
    }

    let _ = conn.close();
    let _ = shared.hub.remove(conn.id());
    let _ = writer.await;
    let _ = watchdog.await;
    shared.listeners.fire(Lifecycle::Disconnection, &conn);
    info!(conn_id = %conn.id(), age = ?conn.age(), "client disconnected");
}
