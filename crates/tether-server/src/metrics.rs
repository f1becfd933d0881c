//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed here; embedders pick their own exporter.

/// Calls dispatched (counter, labels: namespace).
pub const CALLS_TOTAL: &str = "tether_calls_total";
/// Calls answered with an error (counter, labels: code).
pub const CALL_FAILURES_TOTAL: &str = "tether_call_failures_total";
/// Event frames queued for delivery (counter).
pub const EVENTS_DELIVERED_TOTAL: &str = "tether_events_delivered_total";
/// Outbound frames dropped on a full queue (counter).
pub const SEND_DROPS_TOTAL: &str = "tether_send_drops_total";
/// Handshakes refused by the authorizer (counter).
pub const AUTH_REJECTIONS_TOTAL: &str = "tether_auth_rejections_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "tether_connections";
