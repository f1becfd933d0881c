//! Settings types. Every struct is `#[serde(default)]` so partial files merge
//! cleanly over the compiled defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Listener and transport settings.
    pub server: ServerSettings,
    /// Session store and cookie settings.
    pub session: SessionSettings,
    /// Client connection settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Server network and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port. `0` picks an ephemeral port.
    pub port: u16,
    /// Outbound frames buffered per connection before dropping.
    pub max_send_queue: usize,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_ms: u64,
    /// A connection without a pong for this long is closed.
    pub client_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
        }
    }
}

impl ServerSettings {
    /// Heartbeat interval as a [`Duration`], never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Client timeout as a [`Duration`].
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Session store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Cookie carrying the session identifier.
    pub cookie_name: String,
    /// Lifetime granted by each successful handshake.
    pub max_age_ms: u64,
    /// How often expired sessions are purged.
    pub sweep_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "tether-session".to_string(),
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl SessionSettings {
    /// Session max age as a [`Duration`].
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    /// Sweep interval as a [`Duration`], never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Client connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// How long to wait for the `ready` frame.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
