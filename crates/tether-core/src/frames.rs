//! JSON frames exchanged over the duplex connection.
//!
//! Each WebSocket text message carries exactly one frame, tagged by `"type"`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::definition::DefinitionSet;
use crate::errors::ProtocolError;
use crate::ids::SessionId;

/// Failure payload of a reply frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Diagnostic trace, if the failing operation provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Server → client frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Sent once, after the handshake: the full definition set.
    Ready {
        /// Session bound to this connection; re-present it to resume.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Every registered namespace.
        namespaces: DefinitionSet,
    },
    /// The single reply to a call.
    Reply {
        /// Correlation id chosen by the caller.
        id: u64,
        /// Failure payload, `null` on success.
        error: Option<CallFailure>,
        /// Operation result.
        #[serde(default)]
        result: Option<Value>,
    },
    /// One delivery for one satisfied subscription.
    Event {
        /// Full event key, suffix included.
        event: String,
        /// Event payload.
        data: Value,
    },
}

impl ServerFrame {
    /// Successful reply.
    pub fn success(id: u64, result: Value) -> Self {
        Self::Reply {
            id,
            error: None,
            result: Some(result),
        }
    }

    /// Failed reply.
    pub fn failure(id: u64, error: &ProtocolError) -> Self {
        Self::Reply {
            id,
            error: Some(error.to_failure()),
            result: None,
        }
    }

    /// Parse a frame received from a server.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame {
            message: e.to_string(),
        })
    }
}

/// Client → server frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Invoke `method` with a named argument record.
    #[serde(rename = "call")]
    Call {
        /// Correlation id echoed in the reply.
        id: u64,
        /// `ns.op` key.
        method: String,
        /// Arguments keyed by declared parameter name.
        #[serde(default)]
        args: Map<String, Value>,
    },
    /// Add a subscription, filtered when `query` is present.
    #[serde(rename = "_subscribeToEvent")]
    Subscribe {
        /// Event key, suffixed when `query` is present.
        event: String,
        /// Predicate query; `false` and `null` both mean "unfiltered".
        #[serde(
            default,
            deserialize_with = "query_or_false",
            skip_serializing_if = "Option::is_none"
        )]
        query: Option<Value>,
    },
    /// Remove the subscription with exactly this key.
    #[serde(rename = "_unsubscribeFromEvent")]
    Unsubscribe {
        /// Event key, suffix included.
        event: String,
    },
}

impl ClientFrame {
    /// Parse a frame received from a client.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame {
            message: e.to_string(),
        })
    }

    /// Best-effort recovery of a call id from a frame that failed to parse,
    /// so the caller can still be answered.
    pub fn call_id_hint(text: &str) -> Option<u64> {
        let value: Value = serde_json::from_str(text).ok()?;
        if value.get("type")?.as_str()? != "call" {
            return None;
        }
        value.get("id")?.as_u64()
    }
}

fn query_or_false<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.filter(|v| !matches!(v, Value::Bool(false))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_wire_format() {
        let mut namespaces = DefinitionSet::new();
        let _ = namespaces.insert("myApi".into(), Default::default());
        let frame = ServerFrame::Ready {
            session_id: SessionId::from_raw("sess_1"),
            namespaces,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "ready", "sessionId": "sess_1", "namespaces": {"myApi": {}}})
        );
    }

    #[test]
    fn success_reply_has_null_error() {
        let v = serde_json::to_value(ServerFrame::success(7, json!(3))).unwrap();
        assert_eq!(v, json!({"type": "reply", "id": 7, "error": null, "result": 3}));
    }

    #[test]
    fn failure_reply_carries_message() {
        let err = ProtocolError::UnknownNamespace { namespace: "nope".into() };
        let v = serde_json::to_value(ServerFrame::failure(1, &err)).unwrap();
        assert_eq!(v["error"]["code"], "UNKNOWN_NAMESPACE");
        assert_eq!(v["error"]["message"], "No such namespace: nope");
        assert!(v["error"].get("stack").is_none());
    }

    #[test]
    fn reply_without_result_parses() {
        let frame = ServerFrame::parse(r#"{"type":"reply","id":1,"error":null}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Reply {
                id: 1,
                error: None,
                result: None
            }
        );
    }

    #[test]
    fn event_wire_format() {
        let frame = ServerFrame::parse(r#"{"type":"event","event":"a.b#1","data":5}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Event {
                event: "a.b#1".into(),
                data: json!(5)
            }
        );
    }

    #[test]
    fn call_frame_parses() {
        let frame =
            ClientFrame::parse(r#"{"type":"call","id":3,"method":"myApi.sum","args":{"a":1,"b":2}}"#)
                .unwrap();
        let ClientFrame::Call { id, method, args } = frame else {
            panic!("expected call");
        };
        assert_eq!(id, 3);
        assert_eq!(method, "myApi.sum");
        assert_eq!(args["b"], 2);
    }

    #[test]
    fn call_frame_without_args_defaults_to_empty() {
        let frame = ClientFrame::parse(r#"{"type":"call","id":1,"method":"a.b"}"#).unwrap();
        assert_matches::assert_matches!(frame, ClientFrame::Call { args, .. } if args.is_empty());
    }

    #[test]
    fn subscribe_false_query_is_unfiltered() {
        let frame =
            ClientFrame::parse(r#"{"type":"_subscribeToEvent","event":"a.b","query":false}"#)
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                event: "a.b".into(),
                query: None
            }
        );
    }

    #[test]
    fn subscribe_missing_query_is_unfiltered() {
        let frame = ClientFrame::parse(r#"{"type":"_subscribeToEvent","event":"a.b"}"#).unwrap();
        assert_matches::assert_matches!(frame, ClientFrame::Subscribe { query: None, .. });
    }

    #[test]
    fn subscribe_with_query() {
        let frame = ClientFrame::parse(
            r#"{"type":"_subscribeToEvent","event":"a.b#1","query":{"$gte":0}}"#,
        )
        .unwrap();
        assert_matches::assert_matches!(
            frame,
            ClientFrame::Subscribe { query: Some(q), .. } if q == json!({"$gte": 0})
        );
    }

    #[test]
    fn unsubscribe_serializes_with_reserved_name() {
        let v = serde_json::to_value(ClientFrame::Unsubscribe { event: "a.b".into() }).unwrap();
        assert_eq!(v, json!({"type": "_unsubscribeFromEvent", "event": "a.b"}));
    }

    #[test]
    fn invalid_frame_is_protocol_error() {
        let err = ClientFrame::parse("not json").unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_FRAME);
    }

    #[test]
    fn call_id_hint_recovers_id() {
        assert_eq!(
            ClientFrame::call_id_hint(r#"{"type":"call","id":9,"method":5}"#),
            Some(9)
        );
        assert_eq!(ClientFrame::call_id_hint(r#"{"type":"other","id":9}"#), None);
        assert_eq!(ClientFrame::call_id_hint("garbage"), None);
    }
}
