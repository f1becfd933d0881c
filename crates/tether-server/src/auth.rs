//! Connection handshake: session resolution, authorization, and the
//! session cookie.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tether_core::{ProtocolError, SessionId};
use tracing::{debug, warn};

use crate::metrics::AUTH_REJECTIONS_TOTAL;
use crate::session::{Session, SessionStore};

/// What a connecting peer presented.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Session identifier from the cookie, if any.
    pub session_id: Option<SessionId>,
    /// Bearer token from the `Authorization` header, if any.
    pub token: Option<String>,
}

/// Refusal returned by an [`Authorizer`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    /// Reason reported to the peer.
    pub reason: String,
}

impl Rejection {
    /// Rejection with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Authorization hook run once per handshake, after the session resolves.
///
/// It may read and mutate session attributes.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Accept or refuse the connection.
    async fn authorize(&self, session: &Session, credentials: &Credentials)
    -> Result<(), Rejection>;
}

/// Accepts every connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _: &Session, _: &Credentials) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Resolve the session, run the authorizer, and on success extend the
/// session's lifetime to `max_age`.
///
/// A session created by a refused handshake is discarded.
pub async fn handshake(
    sessions: &SessionStore,
    authorizer: &dyn Authorizer,
    credentials: &Credentials,
    max_age: Duration,
) -> Result<Arc<Session>, ProtocolError> {
    let (session, created) = sessions.resolve(credentials.session_id.as_ref());
    if let Err(rejection) = authorizer.authorize(&session, credentials).await {
        if created {
            let _ = sessions.remove(session.id());
        }
        counter!(AUTH_REJECTIONS_TOTAL).increment(1);
        warn!(session_id = %session.id(), reason = %rejection.reason, "handshake rejected");
        return Err(ProtocolError::AuthRejected {
            reason: rejection.reason,
        });
    }
    session.touch(max_age);
    debug!(session_id = %session.id(), created, "handshake accepted");
    Ok(session)
}

#[derive(Serialize, Deserialize)]
struct CookiePayload {
    #[serde(rename = "sessionId")]
    session_id: SessionId,
}

/// Encode a session id as a cookie value: base64 of `{"sessionId": ...}`.
pub fn encode_session_cookie(id: &SessionId) -> String {
    let payload = CookiePayload {
        session_id: id.clone(),
    };
    // Serializing a single string field cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    STANDARD.encode(json)
}

/// Decode a session cookie value. Accepts the encoded form produced by
/// [`encode_session_cookie`] or a bare session id.
pub fn decode_session_cookie(value: &str) -> Option<SessionId> {
    let value = value.trim().trim_matches('"');
    if value.is_empty() {
        return None;
    }
    let decoded = STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<CookiePayload>(&bytes).ok());
    Some(decoded.map_or_else(|| SessionId::from_raw(value), |p| p.session_id))
}

/// Find the session id in a `Cookie` header.
pub fn session_from_cookie_header(header: &str, cookie_name: &str) -> Option<SessionId> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .and_then(|(_, value)| decode_session_cookie(value))
}

/// `Set-Cookie` header value carrying the session id.
pub fn set_cookie_value(cookie_name: &str, id: &SessionId, max_age: Duration) -> String {
    format!(
        "{cookie_name}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        encode_session_cookie(id),
        max_age.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    struct DenyGuests;

    #[async_trait]
    impl Authorizer for DenyGuests {
        async fn authorize(&self, session: &Session, creds: &Credentials) -> Result<(), Rejection> {
            match creds.token.as_deref() {
                Some("letmein") => {
                    let _ = session.set("username", json!("member"));
                    Ok(())
                }
                _ => Err(Rejection::new("token required")),
            }
        }
    }

    #[tokio::test]
    async fn allow_all_creates_and_touches_session() {
        let store = SessionStore::new();
        let session = handshake(&store, &AllowAll, &Credentials::default(), WEEK)
            .await
            .unwrap();
        assert!(!session.is_expired_at(chrono::Utc::now()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn presented_session_is_resumed() {
        let store = SessionStore::new();
        let first = handshake(&store, &AllowAll, &Credentials::default(), WEEK)
            .await
            .unwrap();
        let _ = first.set("username", json!("guest"));
        let creds = Credentials {
            session_id: Some(first.id().clone()),
            token: None,
        };
        let second = handshake(&store, &AllowAll, &creds, WEEK).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("username"), Some(json!("guest")));
    }

    #[tokio::test]
    async fn authorizer_can_mutate_session() {
        let store = SessionStore::new();
        let creds = Credentials {
            session_id: None,
            token: Some("letmein".into()),
        };
        let session = handshake(&store, &DenyGuests, &creds, WEEK).await.unwrap();
        assert_eq!(session.get("username"), Some(json!("member")));
    }

    #[tokio::test]
    async fn rejection_discards_created_session() {
        let store = SessionStore::new();
        let err = handshake(&store, &DenyGuests, &Credentials::default(), WEEK)
            .await
            .unwrap_err();
        assert_matches!(err, ProtocolError::AuthRejected { reason } if reason == "token required");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rejection_keeps_existing_session() {
        let store = SessionStore::new();
        let session = handshake(&store, &AllowAll, &Credentials::default(), WEEK)
            .await
            .unwrap();
        let creds = Credentials {
            session_id: Some(session.id().clone()),
            token: None,
        };
        assert!(handshake(&store, &DenyGuests, &creds, WEEK).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cookie_roundtrip() {
        let id = SessionId::new();
        let encoded = encode_session_cookie(&id);
        assert_eq!(decode_session_cookie(&encoded), Some(id));
    }

    #[test]
    fn bare_cookie_value_is_accepted() {
        assert_eq!(
            decode_session_cookie("sess_abc"),
            Some(SessionId::from_raw("sess_abc"))
        );
        assert_eq!(decode_session_cookie("  "), None);
    }

    #[test]
    fn cookie_header_lookup() {
        let id = SessionId::new();
        let header = format!("theme=dark; tether-session={}; other=1", encode_session_cookie(&id));
        assert_eq!(session_from_cookie_header(&header, "tether-session"), Some(id));
        assert_eq!(session_from_cookie_header("theme=dark", "tether-session"), None);
    }

    #[test]
    fn set_cookie_format() {
        let id = SessionId::from_raw("sess_1");
        let value = set_cookie_value("tether-session", &id, WEEK);
        assert!(value.starts_with("tether-session="));
        assert!(value.contains("Max-Age=604800"));
        assert!(value.contains("HttpOnly"));
        let cookie = value.split(';').next().unwrap();
        assert_eq!(
            session_from_cookie_header(cookie, "tether-session"),
            Some(SessionId::from_raw("sess_1"))
        );
    }
}
