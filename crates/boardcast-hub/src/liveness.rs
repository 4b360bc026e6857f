//! Periodic liveness sweep that evicts unresponsive connections.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::errors::ProbeError;
use crate::metrics::LIVENESS_EVICTIONS_TOTAL;
use crate::state::SharedState;

/// Probes every registered connection on a fixed interval.
pub struct LivenessMonitor {
    state: Arc<SharedState>,
    interval: Duration,
    probe_timeout: Duration,
    pong_timeout: Option<Duration>,
}

impl LivenessMonitor {
    /// Create a monitor over the shared registry.
    pub fn new(
        state: Arc<SharedState>,
        interval: Duration,
        probe_timeout: Duration,
        pong_timeout: Option<Duration>,
    ) -> Self {
        Self {
            state,
            interval,
            probe_timeout,
            pong_timeout,
        }
    }

    /// Sweep every `interval` until cancelled. The first sweep runs one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        debug!(interval_secs = self.interval.as_secs(), "liveness monitor started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep().await;
                    if evicted > 0 {
                        info!(
                            evicted,
                            clients = self.state.len(),
                            "liveness sweep evicted dead connections"
                        );
                    }
                }
            }
        }
        info!("liveness monitor stopped");
    }

    /// Probe all connections concurrently and evict the ones that fail.
    ///
    /// Returns the number of connections this sweep closed.
    pub async fn sweep(&self) -> usize {
        let clients = self.state.snapshot_clients();
        if clients.is_empty() {
            return 0;
        }
        let results = join_all(clients.iter().map(|conn| self.check(conn))).await;

        let mut evicted = 0;
        for (conn, result) in clients.iter().zip(results) {
            if let Err(e) = result {
                warn!(conn_id = %conn.id(), error = %e, "removing dead connection");
                if self.state.disconnect(conn) {
                    counter!(LIVENESS_EVICTIONS_TOTAL).increment(1);
                    evicted += 1;
                }
            }
        }
        debug!(probed = clients.len(), evicted, "liveness sweep complete");
        evicted
    }

    async fn check(&self, conn: &Connection) -> Result<(), ProbeError> {
        if let Some(limit) = self.pong_timeout {
            let idle = conn.idle_for();
            if idle > limit {
                return Err(ProbeError::Idle(idle));
            }
        }
        conn.probe(self.probe_timeout).await
    }
}
