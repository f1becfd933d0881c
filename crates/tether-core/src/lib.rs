//! # tether-core
//!
//! Transport-agnostic building blocks shared by the tether server and client:
//!
//! - [`ids`]: branded session and connection identifiers
//! - [`definition`]: the wire-transmissible namespace definition set
//! - [`event_key`]: `ns.event[#id]` event addressing
//! - [`frames`]: JSON frames exchanged over the duplex connection
//! - [`query`]: the predicate filter applied to event payloads
//! - [`errors`]: protocol error kinds and their stable wire codes

#![deny(unsafe_code)]

pub mod definition;
pub mod errors;
pub mod event_key;
pub mod frames;
pub mod ids;
pub mod query;

pub use definition::{DefinitionSet, MemberDefinition, NamespaceDefinition};
pub use errors::ProtocolError;
pub use event_key::EventKey;
pub use frames::{CallFailure, ClientFrame, ServerFrame};
pub use ids::{ConnectionId, SessionId};
pub use query::{Query, QueryError};
