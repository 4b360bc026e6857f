//! `Hub`: owns the shared content, the connection registry, the broadcast
//! queue and the background tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HubConfig;
use crate::connection::{Connection, ConnectionId};
use crate::dispatcher::{self, BroadcastMessage, Dispatcher};
use crate::errors::{SendError, SnapshotError};
use crate::liveness::LivenessMonitor;
use crate::snapshot::SnapshotManager;
use crate::state::SharedState;

/// Process-wide hub. Construct once, `init`, hand an `Arc<Hub>` to handlers.
pub struct Hub {
    config: HubConfig,
    state: Arc<SharedState>,
    dispatcher: Dispatcher,
    /// Receiver half of the broadcast queue, taken by `init`.
    pending: Mutex<Option<mpsc::Receiver<BroadcastMessage>>>,
    snapshots: SnapshotManager,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Build a hub. No tasks run until [`Hub::init`].
    pub fn new(config: HubConfig, snapshots: SnapshotManager) -> Self {
        let (dispatcher, rx) = Dispatcher::channel(config.broadcast_capacity);
        Self {
            config,
            state: Arc::new(SharedState::new()),
            dispatcher,
            pending: Mutex::new(Some(rx)),
            snapshots,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the dispatcher worker and the liveness monitor.
    ///
    /// Must be called inside a Tokio runtime. Returns `false` if already started.
    pub fn init(&self) -> bool {
        let Some(rx) = self.pending.lock().take() else {
            warn!("hub already initialized");
            return false;
        };
        let dispatcher = tokio::spawn(dispatcher::run_dispatcher(
            rx,
            Arc::clone(&self.state),
            self.cancel.child_token(),
        ));
        let monitor = LivenessMonitor::new(
            Arc::clone(&self.state),
            self.config.liveness_interval(),
            self.config.probe_timeout(),
            self.config.pong_timeout(),
        );
        let liveness = tokio::spawn(monitor.run(self.cancel.child_token()));
        self.tasks.lock().extend([dispatcher, liveness]);
        info!(
            broadcast_capacity = self.config.broadcast_capacity,
            liveness_interval_secs = self.config.liveness_interval_secs,
            "hub started"
        );
        true
    }

    /// Stop background tasks and close every connection.
    ///
    /// Waits up to `grace` for the tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        let clients = self.state.snapshot_clients();
        for conn in &clients {
            let _ = conn.begin_closing();
            let _ = self.state.disconnect(conn);
        }
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        info!(
            closed = clients.len(),
            task_count = handles.len(),
            grace_secs = grace.as_secs(),
            "hub shutting down"
        );
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("hub shutdown timed out after {grace:?}, some tasks may still be running");
        }
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Current shared content.
    pub fn content(&self) -> Arc<str> {
        self.state.content()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.len()
    }

    /// Broadcast messages dropped because the queue was full.
    pub fn dropped_broadcasts(&self) -> u64 {
        self.dispatcher.dropped()
    }

    /// Register a new connection, seed it with the current content, and mark it open.
    ///
    /// On failure the connection is already unregistered and closed.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<(), SendError> {
        if let Err(e) = self.state.add_and_seed(conn) {
            let _ = self.state.disconnect(conn);
            return Err(e);
        }
        // Checked after adding: a shutdown that already took its client list
        // would otherwise leave this connection open.
        if self.is_shutting_down() {
            let _ = self.state.disconnect(conn);
            return Err(SendError::Closed);
        }
        let _ = conn.mark_open();
        Ok(())
    }

    /// Accept an update from `sender`: replace the content and queue the fan-out.
    ///
    /// Both happen under the state write lock, so the queue order matches the
    /// order of content writes. Never blocks. Returns `false` if the broadcast
    /// was dropped.
    pub fn ingest(&self, sender: &ConnectionId, payload: &str) -> bool {
        self.dispatcher
            .publish_update(&self.state, Arc::from(payload), sender.clone())
    }

    /// Unregister and close a connection. Idempotent.
    pub fn disconnect(&self, conn: &Connection) -> bool {
        self.state.disconnect(conn)
    }

    /// Save the content to the snapshot file.
    pub async fn save_snapshot(&self) -> Result<usize, SnapshotError> {
        self.snapshots.save(&self.state).await
    }

    /// Restore the content from the snapshot file and queue it for every client.
    ///
    /// Returns the number of bytes restored.
    pub async fn restore_snapshot(&self) -> Result<usize, SnapshotError> {
        self.snapshots.restore(&self.state, &self.dispatcher).await
    }
}
