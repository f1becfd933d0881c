//! Inbound frame dispatch.
//!
//! Frames from one connection are handled strictly in arrival order.
//! Subscribe and unsubscribe apply synchronously; calls are spawned so a
//! slow operation never blocks the frames behind it, and each call produces
//! exactly one reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use serde_json::{Map, Value};
use tether_core::{ClientFrame, EventKey, ProtocolError, Query, ServerFrame};
use tracing::{debug, error, instrument, warn};

use super::connection::Connection;
use crate::metrics::{CALL_FAILURES_TOTAL, CALLS_TOTAL};
use crate::registry::Registry;
use crate::session::Session;

/// Handle one inbound text frame.
pub fn handle_message(text: &str, connection: &Arc<Connection>, registry: &Arc<Registry>) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(conn_id = %connection.id(), error = %err, "invalid frame received");
            if let Some(id) = ClientFrame::call_id_hint(text) {
                let _ = connection.send_frame(&ServerFrame::failure(id, &err));
            }
            return;
        }
    };

    match frame {
        ClientFrame::Call { id, method, args } => {
            let connection = Arc::clone(connection);
            let registry = Arc::clone(registry);
            drop(tokio::spawn(async move {
                let session = Arc::clone(connection.session());
                let reply = match dispatch_call(&registry, session, &method, args).await {
                    Ok(result) => ServerFrame::success(id, result),
                    Err(err) => ServerFrame::failure(id, &err),
                };
                if !connection.send_frame(&reply) {
                    debug!(conn_id = %connection.id(), id, method, "reply not delivered");
                }
            }));
        }
        ClientFrame::Subscribe { event, query } => subscribe(connection, &event, query.as_ref()),
        ClientFrame::Unsubscribe { event } => {
            let removed = connection.unsubscribe(&event);
            debug!(conn_id = %connection.id(), event, removed, "unsubscribed");
        }
    }
}

fn subscribe(connection: &Connection, event: &str, query: Option<&Value>) {
    let key = match EventKey::parse(event) {
        Ok(key) => key,
        Err(err) => {
            warn!(conn_id = %connection.id(), event, error = %err, "ignoring subscription");
            return;
        }
    };
    let query = match query.map(Query::compile).transpose() {
        Ok(query) => query,
        Err(err) => {
            warn!(conn_id = %connection.id(), event, error = %err, "ignoring subscription with invalid query");
            return;
        }
    };
    let filtered = query.is_some();
    if filtered && key.suffix().is_none() {
        warn!(conn_id = %connection.id(), event, "ignoring filtered subscription without an id suffix");
        return;
    }
    let outcome = connection.subscribe(key, query);
    debug!(conn_id = %connection.id(), event, filtered, ?outcome, "subscribed");
}

/// Resolve `method` and run it for `session`.
///
/// Operation failures, including panics, become `HandlerFailure` and are
/// logged with the call's arguments.
#[instrument(skip_all, fields(method = %method, session_id = %session.id()))]
pub async fn dispatch_call(
    registry: &Registry,
    session: Arc<Session>,
    method: &str,
    args: Map<String, Value>,
) -> Result<Value, ProtocolError> {
    let outcome = run_call(registry, session, method, args).await;
    if let Err(err) = &outcome {
        counter!(CALL_FAILURES_TOTAL, "code" => err.code()).increment(1);
    }
    outcome
}

async fn run_call(
    registry: &Registry,
    session: Arc<Session>,
    method: &str,
    args: Map<String, Value>,
) -> Result<Value, ProtocolError> {
    let (namespace, function) = registry.resolve(method).inspect_err(|err| {
        debug!(error = %err, "call rejected");
    })?;
    counter!(CALLS_TOTAL, "namespace" => namespace.name().to_string()).increment(1);

    let arguments = function.arguments(args);
    let args = Value::Object(arguments.to_record());
    let invocation = function.operation().invoke(session, arguments);
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!(%args, error = %err.message, trace = ?err.trace, "operation failed");
            Err(ProtocolError::HandlerFailure {
                message: err.message,
                trace: err.trace,
            })
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%args, panic = %message, "operation panicked");
            Err(ProtocolError::HandlerFailure {
                message,
                trace: None,
            })
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "operation panicked".to_string())
}
