//! Hub error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to enqueue a frame for a connection's socket writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closed or its writer task has exited.
    #[error("connection closed")]
    Closed,
    /// The connection's outbound queue is full (client too slow).
    #[error("outbound queue full")]
    Full,
}

/// Failure of a liveness probe.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The connection is closed or its writer task has exited.
    #[error("connection closed")]
    Closed,
    /// The ping was not written within the deadline.
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
    /// Writing the ping frame to the transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// No pong or inbound frame for longer than the idle limit.
    #[error("no pong for {0:?}")]
    Idle(Duration),
}

/// Snapshot file I/O failure.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Writing the snapshot file failed.
    #[error("failed to write snapshot {}: {source}", .path.display())]
    Write {
        /// Snapshot file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the snapshot file failed (missing, unreadable, not UTF-8).
    #[error("failed to read snapshot {}: {source}", .path.display())]
    Read {
        /// Snapshot file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Invalid hub configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid hub config: {field} {reason}")]
pub struct ConfigError {
    /// Offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_display() {
        assert_eq!(SendError::Closed.to_string(), "connection closed");
        assert_eq!(SendError::Full.to_string(), "outbound queue full");
    }

    #[test]
    fn probe_timeout_display() {
        let err = ProbeError::TimedOut(Duration::from_secs(5));
        assert_eq!(err.to_string(), "probe timed out after 5s");
    }

    #[test]
    fn snapshot_error_includes_path() {
        let err = SnapshotError::Read {
            path: PathBuf::from("/tmp/missing.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.txt"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError {
            field: "broadcast_capacity",
            reason: "must be greater than zero",
        };
        assert_eq!(
            err.to_string(),
            "invalid hub config: broadcast_capacity must be greater than zero"
        );
    }
}
