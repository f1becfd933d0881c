//! Client configuration.

use std::time::Duration;

use tether_core::SessionId;
use tether_settings::TetherSettings;

/// How to reach a server.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Session to resume, presented as a cookie.
    pub session_id: Option<SessionId>,
    /// Cookie carrying the session id.
    pub cookie_name: String,
    /// Bearer token sent in the `Authorization` header.
    pub token: Option<String>,
    /// Bound on the wait for `ready`.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Config with default cookie name and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &TetherSettings::default())
    }

    /// Config taking the cookie name and timeout from settings.
    pub fn from_settings(url: impl Into<String>, settings: &TetherSettings) -> Self {
        Self {
            url: url.into(),
            session_id: None,
            cookie_name: settings.session.cookie_name.clone(),
            token: None,
            connect_timeout: settings.client.connect_timeout(),
        }
    }

    /// Resume `session_id`.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Send a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = ClientConfig::new("ws://localhost/ws");
        assert_eq!(config.cookie_name, "tether-session");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.session_id.is_none());
    }

    #[test]
    fn builders() {
        let config = ClientConfig::new("ws://x/ws")
            .with_session(SessionId::from_raw("sess_1"))
            .with_token("t")
            .with_connect_timeout(Duration::from_millis(5));
        assert_eq!(config.session_id.unwrap().as_str(), "sess_1");
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(config.connect_timeout, Duration::from_millis(5));
    }
}
