//! Namespace registry.
//!
//! A [`Namespace`] is built once, validated, and then registered atomically:
//! re-registering a name swaps the whole namespace in one step, so a reader
//! never sees a half-updated member table. Calls already in flight keep the
//! `Arc<Namespace>` they resolved.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tether_core::definition::{is_reserved, is_valid_namespace_name};
use tether_core::{DefinitionSet, MemberDefinition, NamespaceDefinition, ProtocolError};

use crate::errors::RegistrationError;
use crate::operation::{Arguments, Operation, OperationError};
use crate::session::Session;

/// Whether a function is reachable by remote callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Listed in the definition set and dispatchable.
    Exported,
    /// Callable only from server code.
    Internal,
}

/// A function member: its declared parameters and body.
#[derive(Clone)]
pub struct FunctionMember {
    params: Arc<[String]>,
    operation: Arc<dyn Operation>,
    visibility: Visibility,
}

impl FunctionMember {
    /// Declared parameter names, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether remote callers may invoke this function.
    pub fn is_exported(&self) -> bool {
        self.visibility == Visibility::Exported
    }

    /// The operation body.
    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.operation
    }

    /// Build arguments for this function from a named record.
    pub fn arguments(&self, record: serde_json::Map<String, Value>) -> Arguments {
        Arguments::from_record(Arc::clone(&self.params), record)
    }
}

impl std::fmt::Debug for FunctionMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMember")
            .field("params", &self.params)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// One member of a namespace.
#[derive(Clone, Debug)]
pub enum Member {
    /// An invocable operation.
    Function(FunctionMember),
    /// A read-only value.
    Constant(Value),
}

/// A named group of operations and constants.
#[derive(Debug)]
pub struct Namespace {
    name: String,
    members: BTreeMap<String, Member>,
    definition: NamespaceDefinition,
}

impl Namespace {
    /// Start building a namespace.
    pub fn builder(name: impl Into<String>) -> NamespaceBuilder {
        NamespaceBuilder {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transmitted definition: constants and exported functions only.
    pub fn definition(&self) -> &NamespaceDefinition {
        &self.definition
    }

    /// Look up any member, exported or not.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Value of a constant member.
    pub fn constant(&self, name: &str) -> Option<&Value> {
        match self.members.get(name)? {
            Member::Constant(value) => Some(value),
            Member::Function(_) => None,
        }
    }

    /// Resolve `op` to a remotely callable function.
    ///
    /// Missing, internal, and reserved members all report `UnknownOperation`
    /// so callers cannot probe for hidden names.
    pub fn exported_function(&self, op: &str) -> Result<&FunctionMember, ProtocolError> {
        let method = || format!("{}.{op}", self.name);
        if is_reserved(op) {
            return Err(ProtocolError::UnknownOperation { method: method() });
        }
        match self.members.get(op) {
            Some(Member::Function(f)) if f.is_exported() => Ok(f),
            Some(Member::Constant(_)) => Err(ProtocolError::NotAFunction { method: method() }),
            _ => Err(ProtocolError::UnknownOperation { method: method() }),
        }
    }

    /// Invoke any function member from server code with positional
    /// arguments. Internal functions are reachable here.
    pub async fn call_local(
        &self,
        name: &str,
        session: Arc<Session>,
        args: Vec<Value>,
    ) -> Result<Value, OperationError> {
        let Some(Member::Function(f)) = self.members.get(name) else {
            return Err(OperationError::new(format!(
                "No such method: {}.{name}",
                self.name
            )));
        };
        let args = Arguments::from_positional(Arc::clone(&f.params), args);
        f.operation.invoke(session, args).await
    }
}

/// Builder for [`Namespace`].
pub struct NamespaceBuilder {
    name: String,
    members: Vec<(String, Member)>,
}

impl NamespaceBuilder {
    /// Add a constant.
    #[must_use]
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.push((name.into(), Member::Constant(value)));
        self
    }

    /// Add an exported function with its declared parameter names.
    #[must_use]
    pub fn export(
        self,
        name: impl Into<String>,
        params: &[&str],
        operation: Arc<dyn Operation>,
    ) -> Self {
        self.function(name.into(), params, operation, Visibility::Exported)
    }

    /// Add a server-only function.
    #[must_use]
    pub fn internal(
        self,
        name: impl Into<String>,
        params: &[&str],
        operation: Arc<dyn Operation>,
    ) -> Self {
        self.function(name.into(), params, operation, Visibility::Internal)
    }

    fn function(
        mut self,
        name: String,
        params: &[&str],
        operation: Arc<dyn Operation>,
        visibility: Visibility,
    ) -> Self {
        let params: Arc<[String]> = params.iter().map(|p| (*p).to_string()).collect();
        self.members.push((
            name,
            Member::Function(FunctionMember {
                params,
                operation,
                visibility,
            }),
        ));
        self
    }

    /// Validate and finish the namespace.
    pub fn build(self) -> Result<Namespace, RegistrationError> {
        if !is_valid_namespace_name(&self.name) {
            return Err(RegistrationError::InvalidNamespaceName(self.name));
        }
        let mut members = BTreeMap::new();
        let mut definition = NamespaceDefinition::new();
        for (member, value) in self.members {
            if is_reserved(&member) {
                return Err(RegistrationError::ReservedName {
                    namespace: self.name,
                    member,
                });
            }
            if members.contains_key(&member) {
                return Err(RegistrationError::DuplicateMember {
                    namespace: self.name,
                    member,
                });
            }
            match &value {
                Member::Constant(v) => {
                    let _ = definition.insert(
                        member.clone(),
                        MemberDefinition::Constant { value: v.clone() },
                    );
                }
                Member::Function(f) if f.is_exported() => {
                    let _ = definition.insert(
                        member.clone(),
                        MemberDefinition::Function {
                            params: f.params.to_vec(),
                        },
                    );
                }
                Member::Function(_) => {}
            }
            let _ = members.insert(member, value);
        }
        Ok(Namespace {
            name: self.name,
            members,
            definition,
        })
    }
}

/// Registered namespaces, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace, replacing any previous one with the same name.
    pub fn register(&self, namespace: Namespace) -> Option<Arc<Namespace>> {
        let name = namespace.name.clone();
        self.namespaces.write().insert(name, Arc::new(namespace))
    }

    /// Remove a namespace.
    pub fn unregister(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.write().remove(name)
    }

    /// Whether `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.namespaces.read().contains_key(name)
    }

    /// Get a namespace by name.
    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(name).cloned()
    }

    /// Sorted namespace names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered namespaces.
    pub fn count(&self) -> usize {
        self.namespaces.read().len()
    }

    /// Definition set transmitted in the `ready` frame.
    pub fn definitions(&self) -> DefinitionSet {
        self.namespaces
            .read()
            .iter()
            .map(|(name, ns)| (name.clone(), ns.definition.clone()))
            .collect()
    }

    /// Resolve an `ns.op` method key to its namespace and exported function.
    pub fn resolve(&self, method: &str) -> Result<(Arc<Namespace>, FunctionMember), ProtocolError> {
        let (ns, op) = method.split_once('.').unwrap_or((method, ""));
        let namespace = self
            .get(ns)
            .ok_or_else(|| ProtocolError::UnknownNamespace {
                namespace: ns.to_string(),
            })?;
        let function = namespace.exported_function(op)?.clone();
        Ok((namespace, function))
    }

    /// Drop every namespace.
    pub fn clear(&self) {
        self.namespaces.write().clear();
    }
}
