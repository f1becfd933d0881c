//! Namespace stubs synthesized from the server's definition set.
//!
//! A stub looks its namespace up in the definitions of the current
//! connection, so after [`Client::reconnect`](crate::Client::reconnect) it
//! reflects whatever the server now exposes.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::definition::args_to_record;
use tether_core::{EventKey, MemberDefinition, NamespaceDefinition, ProtocolError, Query};

use crate::client::Client;
use crate::errors::ClientError;
use crate::events::EventListener;

/// Options for [`NamespaceStub::on`].
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Disambiguates filtered subscriptions to the same event.
    pub id: Option<String>,
    /// Predicate applied to payloads on the server.
    pub query: Option<Value>,
}

impl SubscribeOptions {
    /// Filtered subscription `id` with `query`.
    pub fn filtered(id: impl Into<String>, query: Value) -> Self {
        Self {
            id: Some(id.into()),
            query: Some(query),
        }
    }
}

/// What one [`NamespaceStub::on`] registered. Pass it to
/// [`NamespaceStub::off`] to undo exactly that.
#[derive(Clone)]
pub struct Subscription {
    keys: Vec<String>,
    listener: EventListener,
}

impl Subscription {
    /// Full event keys covered.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("keys", &self.keys).finish()
    }
}

/// Callable proxy for one exported operation.
#[derive(Clone, Debug)]
pub struct RemoteFunction {
    client: Client,
    method: String,
    params: Vec<String>,
}

impl RemoteFunction {
    /// `ns.op` key.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Declared parameter names.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Call with positional arguments, mapped onto the declared parameters.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, ClientError> {
        let record = args_to_record(&self.params, args);
        self.client.call_method(self.method.clone(), record).await
    }
}

/// Proxy for one remote namespace.
#[derive(Clone, Debug)]
pub struct NamespaceStub {
    client: Client,
    name: Arc<str>,
}

impl NamespaceStub {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: Arc::from(name),
        }
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> Result<NamespaceDefinition, ClientError> {
        self.client
            .definitions()
            .remove(&*self.name)
            .ok_or_else(|| {
                ProtocolError::UnknownNamespace {
                    namespace: self.name.to_string(),
                }
                .into()
            })
    }

    /// Names of the exported operations.
    pub fn functions(&self) -> Vec<String> {
        self.definition()
            .map(|d| {
                d.into_iter()
                    .filter(|(_, m)| m.is_function())
                    .map(|(name, _)| name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value of an exported constant.
    pub fn constant(&self, name: &str) -> Option<Value> {
        match self.definition().ok()?.remove(name)? {
            MemberDefinition::Constant { value } => Some(value),
            MemberDefinition::Function { .. } => None,
        }
    }

    /// Proxy for `name`. Fails locally for constants and unknown members.
    pub fn function(&self, name: &str) -> Result<RemoteFunction, ClientError> {
        let method = format!("{}.{name}", self.name);
        match self.definition()?.remove(name) {
            Some(MemberDefinition::Function { params }) => Ok(RemoteFunction {
                client: self.client.clone(),
                method,
                params,
            }),
            Some(MemberDefinition::Constant { .. }) => {
                Err(ProtocolError::NotAFunction { method }.into())
            }
            None => Err(ProtocolError::UnknownOperation { method }.into()),
        }
    }

    /// Call `name` with positional arguments.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.function(name)?.call(args).await
    }

    /// Call `name` and deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<T, ClientError> {
        let value = self.call(name, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Listen for one or more `|`-separated events of this namespace.
    ///
    /// With `options.query` the subscription is filtered on the server and
    /// keyed `ns.event#id`; `options.id` is then required. Without a query
    /// any id is ignored.
    pub fn on(
        &self,
        event_spec: &str,
        listener: EventListener,
        options: SubscribeOptions,
    ) -> Result<Subscription, ClientError> {
        let suffix = match (&options.query, options.id.as_deref()) {
            (Some(query), Some(id)) => {
                if id.is_empty() || id.contains('#') {
                    return Err(ClientError::InvalidEvent(id.to_owned()));
                }
                let _ = Query::compile(query)?;
                Some(id)
            }
            (Some(_), None) => return Err(ClientError::MissingSubscriptionId),
            (None, _) => None,
        };

        let keys = event_spec
            .split('|')
            .map(str::trim)
            .map(|event| {
                if event.is_empty() || event.contains(['.', '#']) {
                    Err(ClientError::InvalidEvent(event.to_owned()))
                } else {
                    Ok(EventKey::compose(&self.name, event, suffix).as_str().to_owned())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        for key in &keys {
            self.client
                .attach_listener(key, options.query.as_ref(), &listener);
        }
        Ok(Subscription { keys, listener })
    }

    /// Undo a [`NamespaceStub::on`]. The server subscription for a key is
    /// removed once no local listener needs it.
    pub fn off(&self, subscription: &Subscription) {
        for key in &subscription.keys {
            self.client.detach_listener(key, &subscription.listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{fake_server, next_json};
    use crate::config::ClientConfig;
    use assert_matches::assert_matches;
    use futures::SinkExt;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn noop() -> EventListener {
        Arc::new(|_: &Value| {})
    }

    async fn connected() -> (NamespaceStub, crate::client::tests::ServerSocket) {
        let (url, server) = fake_server().await;
        let client = Client::connect(ClientConfig::new(url), None).await.unwrap();
        let ws = server.await.unwrap();
        (client.namespace("api").unwrap(), ws)
    }

    #[tokio::test]
    async fn constants_and_functions_are_exposed() {
        let (api, _ws) = connected().await;
        assert_eq!(api.name(), "api");
        assert_eq!(api.constant("LIMIT"), Some(json!(10)));
        assert_eq!(api.constant("sum"), None);
        assert_eq!(api.functions(), vec!["sum".to_string()]);
        let sum = api.function("sum").unwrap();
        assert_eq!(sum.method(), "api.sum");
        assert_eq!(sum.params(), ["a", "b"]);
    }

    #[tokio::test]
    async fn bad_members_fail_locally() {
        let (api, _ws) = connected().await;
        assert_matches!(
            api.call("LIMIT", vec![]).await,
            Err(ClientError::Protocol(ProtocolError::NotAFunction { method })) if method == "api.LIMIT"
        );
        assert_matches!(
            api.call("missing", vec![]).await,
            Err(ClientError::Protocol(ProtocolError::UnknownOperation { method })) if method == "api.missing"
        );
    }

    #[tokio::test]
    async fn positional_args_become_a_record() {
        let (api, mut ws) = connected().await;
        let call = tokio::spawn({
            let api = api.clone();
            async move { api.call_as::<i64>("sum", vec![json!(1), json!(2)]).await }
        });
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["method"], "api.sum");
        assert_eq!(frame["args"], json!({"a": 1, "b": 2}));
        let reply = json!({"type": "reply", "id": frame["id"], "error": null, "result": 3});
        ws.send(Message::text(reply.to_string())).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn query_requires_id() {
        let (api, _ws) = connected().await;
        let options = SubscribeOptions {
            id: None,
            query: Some(json!({"$gte": 0})),
        };
        assert_matches!(
            api.on("n", noop(), options),
            Err(ClientError::MissingSubscriptionId)
        );
    }

    #[tokio::test]
    async fn malformed_specs_are_rejected() {
        let (api, _ws) = connected().await;
        assert_matches!(
            api.on("a||b", noop(), SubscribeOptions::default()),
            Err(ClientError::InvalidEvent(_))
        );
        assert_matches!(
            api.on("x.y", noop(), SubscribeOptions::default()),
            Err(ClientError::InvalidEvent(_))
        );
        assert_matches!(
            api.on("n", noop(), SubscribeOptions::filtered("id", json!({"$near": 1}))),
            Err(ClientError::InvalidQuery(_))
        );
    }

    #[tokio::test]
    async fn multi_event_spec_subscribes_each_event() {
        let (api, mut ws) = connected().await;
        let sub = api
            .on("added | removed", noop(), SubscribeOptions::default())
            .unwrap();
        assert_eq!(sub.keys(), ["api.added", "api.removed"]);
        assert_eq!(next_json(&mut ws).await["event"], "api.added");
        assert_eq!(next_json(&mut ws).await["event"], "api.removed");

        api.off(&sub);
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "_unsubscribeFromEvent", "event": "api.added"})
        );
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "_unsubscribeFromEvent", "event": "api.removed"})
        );
    }

    #[tokio::test]
    async fn filtered_subscription_sends_suffixed_key() {
        let (api, mut ws) = connected().await;
        let sub = api
            .on("n", noop(), SubscribeOptions::filtered("pos", json!({"$gte": 0})))
            .unwrap();
        assert_eq!(sub.keys(), ["api.n#pos"]);
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "_subscribeToEvent", "event": "api.n#pos", "query": {"$gte": 0}})
        );
    }

    #[tokio::test]
    async fn shared_key_unsubscribes_with_last_listener() {
        let (api, mut ws) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        let first_listener: EventListener = Arc::new(move |v: &Value| {
            let _ = tx.send(("first", v.clone()));
        });
        let second_listener: EventListener = Arc::new(move |v: &Value| {
            let _ = tx2.send(("second", v.clone()));
        });
        let first = api
            .on("n", first_listener, SubscribeOptions::default())
            .unwrap();
        let second = api
            .on("n", second_listener, SubscribeOptions::default())
            .unwrap();
        // Only the first listener triggers a subscribe frame.
        assert_eq!(next_json(&mut ws).await["type"], "_subscribeToEvent");

        api.off(&first);
        let event = json!({"type": "event", "event": "api.n", "data": 1});
        ws.send(Message::text(event.to_string())).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ("second", json!(1)));

        api.off(&second);
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "_unsubscribeFromEvent", "event": "api.n"})
        );
    }
}
