//! # tether-client
//!
//! Connects to a tether server, reads its namespace definitions from the
//! `ready` frame, and exposes each namespace as a [`NamespaceStub`]:
//!
//! - [`client`]: socket driver, call correlation, reconnect
//! - [`stub`]: call proxies, constants, and `on`/`off` subscriptions
//! - [`events`]: the local listener table shared by all stubs
//!
//! ```ignore
//! let client = Client::connect(ClientConfig::new("ws://127.0.0.1:8080/ws"), None).await?;
//! let api = client.namespace("myApi").ok_or("myApi not exposed")?;
//! let three: i64 = api.call_as("sum", vec![json!(1), json!(2)]).await?;
//! let sub = api.on("ping", Arc::new(|v| println!("{v}")), SubscribeOptions::default())?;
//! api.off(&sub);
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod stub;

pub use client::{Client, ConnectionStatus, StatusCallback};
pub use config::ClientConfig;
pub use errors::ClientError;
pub use events::EventListener;
pub use stub::{NamespaceStub, RemoteFunction, SubscribeOptions, Subscription};
