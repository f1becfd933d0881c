//! Wire-transmissible namespace definitions.
//!
//! The definition set is what a peer receives in the `ready` frame:
//!
//! ```text
//! { ns: { name: {"type":"function","params":[..]} | {"type":"constant","value":..} } }
//! ```
//!
//! Maps are ordered so the encoded set is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix reserved for protocol-internal names (`_subscribeToEvent`, ...).
/// Members carrying it are never transmitted or dispatched.
pub const RESERVED_PREFIX: char = '_';

/// One transmitted member of a namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MemberDefinition {
    /// An exported operation and its declared parameter names, in order.
    Function {
        /// Parameter names used to map positional arguments to record fields.
        params: Vec<String>,
    },
    /// A read-only value.
    Constant {
        /// The constant's value.
        value: Value,
    },
}

impl MemberDefinition {
    /// Whether this member can be called.
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function { .. })
    }
}

/// Members of one namespace, keyed by member name.
pub type NamespaceDefinition = BTreeMap<String, MemberDefinition>;

/// Every registered namespace, keyed by namespace name.
pub type DefinitionSet = BTreeMap<String, NamespaceDefinition>;

/// Whether a member name falls in the reserved namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Validate a namespace name: non-empty, and free of the `.` and `#`
/// separators used by method and event keys.
pub fn is_valid_namespace_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '#'])
}

/// Map positional arguments onto a record keyed by parameter name.
///
/// Extra arguments are dropped; missing ones are left out of the record.
pub fn args_to_record(params: &[String], args: Vec<Value>) -> serde_json::Map<String, Value> {
    params.iter().cloned().zip(args).collect()
}
