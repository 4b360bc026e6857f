//! Metric names recorded by the hub.
//!
//! Recording is a no-op until the binary installs a recorder.

/// WebSocket connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections removed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Currently registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Payloads accepted into the broadcast queue (counter).
pub const BROADCAST_PUBLISHED_TOTAL: &str = "broadcast_published_total";
/// Payloads dropped because the broadcast queue was full (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Per-connection writes that failed during fan-out (counter).
pub const WS_WRITE_FAILURES_TOTAL: &str = "ws_write_failures_total";
/// Connections evicted by the liveness monitor (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "liveness_evictions_total";
/// Snapshot saves (counter, labels: result).
pub const SNAPSHOT_SAVES_TOTAL: &str = "snapshot_saves_total";
/// Snapshot restores (counter, labels: result).
pub const SNAPSHOT_RESTORES_TOTAL: &str = "snapshot_restores_total";
