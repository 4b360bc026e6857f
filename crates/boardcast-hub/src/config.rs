//! Hub tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Configuration for the hub's queues and liveness monitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Broadcast queue capacity; publishes beyond this are dropped.
    pub broadcast_capacity: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_capacity: usize,
    /// Liveness sweep interval in seconds.
    pub liveness_interval_secs: u64,
    /// Deadline for a single liveness probe in seconds.
    pub probe_timeout_secs: u64,
    /// Evict connections silent for longer than this many seconds (`None` disables).
    pub pong_timeout_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            outbound_capacity: 256,
            liveness_interval_secs: 30,
            probe_timeout_secs: 5,
            pong_timeout_secs: Some(60),
        }
    }
}

impl HubConfig {
    /// Liveness sweep interval.
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    /// Per-probe deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Idle limit, if enabled.
    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_secs.map(Duration::from_secs)
    }

    /// Reject values that would stall or disable the hub.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("broadcast_capacity", self.broadcast_capacity == 0),
            ("outbound_capacity", self.outbound_capacity == 0),
            ("liveness_interval_secs", self.liveness_interval_secs == 0),
            ("probe_timeout_secs", self.probe_timeout_secs == 0),
            ("pong_timeout_secs", self.pong_timeout_secs == Some(0)),
        ];
        match zero.into_iter().find(|&(_, is_zero)| is_zero) {
            Some((field, _)) => Err(ConfigError {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }
}
