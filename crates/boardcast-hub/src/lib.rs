//! # boardcast-hub
//!
//! Shared content, connection registry and broadcast fan-out for boardcast.
//!
//! - One shared text buffer, replaced wholesale by every update
//! - Registry of live `WebSocket` connections, seeded with the content on join
//! - Bounded broadcast queue that drops the newest message when full
//! - Periodic liveness probes that evict half-open connections
//! - File snapshot save and restore

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod hub;
pub mod liveness;
pub mod metrics;
pub mod snapshot;
pub mod state;

pub use config::HubConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use errors::{ConfigError, ProbeError, SendError, SnapshotError};
pub use handler::serve_connection;
pub use hub::Hub;
pub use snapshot::{DEFAULT_SNAPSHOT_FILE, SnapshotManager};
