//! The uniform asynchronous operation contract.
//!
//! Every exported function implements [`Operation`]: it receives the caller's
//! [`Session`] and the call's [`Arguments`] and resolves exactly once, to a
//! value or an [`OperationError`]. How the body suspends internally is its
//! own business.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::session::Session;

/// Failure produced by an operation body.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    /// Message returned to the caller.
    pub message: String,
    /// Optional diagnostic trace, returned as `stack`.
    pub trace: Option<String>,
}

impl OperationError {
    /// Failure with a message and no trace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    /// Attach a diagnostic trace.
    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            trace: Some(format!("{err:?}")),
        }
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Positional call arguments, rehydrated from the named record in declared
/// parameter order.
///
/// A parameter whose field was missing from the record is absent, not `null`.
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    params: Arc<[String]>,
    values: Vec<Option<Value>>,
}

impl Arguments {
    /// Rehydrate positional arguments from a record. Fields that do not
    /// name a declared parameter are ignored.
    pub fn from_record(params: Arc<[String]>, mut record: Map<String, Value>) -> Self {
        let values = params.iter().map(|name| record.remove(name)).collect();
        Self { params, values }
    }

    /// Build arguments from positional values, as a local caller would.
    pub fn from_positional(params: Arc<[String]>, values: Vec<Value>) -> Self {
        let mut values = values.into_iter();
        let values = params.iter().map(|_| values.next()).collect();
        Self { params, values }
    }

    /// Number of declared parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the operation declares no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Argument bound to the parameter called `name`, if present.
    pub fn named(&self, name: &str) -> Option<&Value> {
        let index = self.params.iter().position(|p| p == name)?;
        self.get(index)
    }

    /// Deserialize the argument at `index`. An absent argument deserializes
    /// from `null`, so `Option<T>` parameters accept omission.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, OperationError> {
        let value = self.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            let name = self.params.get(index).map_or("?", String::as_str);
            OperationError::new(format!("invalid argument '{name}': {e}"))
        })
    }

    /// The present arguments as a named record.
    pub fn to_record(&self) -> Map<String, Value> {
        self.params
            .iter()
            .zip(&self.values)
            .filter_map(|(name, value)| Some((name.clone(), value.clone()?)))
            .collect()
    }
}

/// An invocable server-side operation.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Run the operation for `session`.
    async fn invoke(&self, session: Arc<Session>, args: Arguments)
    -> Result<Value, OperationError>;
}

struct FnOperation<F>(F);

#[async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(Arc<Session>, Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    async fn invoke(
        &self,
        session: Arc<Session>,
        args: Arguments,
    ) -> Result<Value, OperationError> {
        (self.0)(session, args).await
    }
}

/// Adapt an async closure into an [`Operation`].
pub fn operation_fn<F, Fut>(f: F) -> Arc<dyn Operation>
where
    F: Fn(Arc<Session>, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    Arc::new(FnOperation(f))
}
