//! # tether-server
//!
//! Namespace-based RPC over WebSocket.
//!
//! - [`registry`]: namespaces of exported operations and constants
//! - [`operation`]: the async operation contract and argument rehydration
//! - [`session`] / [`auth`]: session store, cookie, and handshake hook
//! - [`websocket`]: connections, in-order frame dispatch, heartbeat, fan-out
//! - [`emitter`]: per-namespace event emission with session filters
//! - [`server`]: the `ApiServer` context, Axum routes, and shutdown
//!
//! ```ignore
//! let server = ApiServer::new(TetherSettings::default());
//! let events = server.namespace_handle("myApi");
//! server.register(
//!     Namespace::builder("myApi")
//!         .constant("CONSTANT", json!(42))
//!         .export("sum", &["a", "b"], operation_fn(|_session, args| async move {
//!             Ok(json!(args.parse::<i64>(0)? + args.parse::<i64>(1)?))
//!         }))
//!         .build()?,
//! );
//! let handle = server.start("0.0.0.0:8080").await?;
//! events.emit("ping", json!({"at": "now"}));
//! ```

#![deny(unsafe_code)]

pub mod auth;
pub mod emitter;
pub mod errors;
pub mod health;
pub mod listeners;
pub mod metrics;
pub mod operation;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod subscription;
pub mod telemetry;
pub mod websocket;

pub use auth::{AllowAll, Authorizer, Credentials, Rejection};
pub use emitter::{NamespaceHandle, session_filter};
pub use errors::{RegistrationError, ServerError};
pub use listeners::ListenerId;
pub use operation::{Arguments, Operation, OperationError, operation_fn};
pub use registry::{Namespace, NamespaceBuilder, Registry};
pub use server::{ApiServer, ServerHandle};
pub use session::{Session, SessionFilter, SessionStore};
pub use websocket::connection::{Connection, ConnectionState};
