//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use boardcast_hub::Hub;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates stopping the listener and the hub.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting new connections.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Full graceful shutdown.
    ///
    /// 1. Cancel the token so the listener stops accepting
    /// 2. Close every live connection and stop the hub's tasks
    /// 3. Wait up to `grace` for the server task to finish
    pub async fn drain(&self, hub: &Hub, server: JoinHandle<()>, grace: Duration) {
        self.shutdown();
        hub.shutdown(grace).await;
        info!(grace_secs = grace.as_secs(), "waiting for http server to stop");
        if tokio::time::timeout(grace, server).await.is_err() {
            warn!("http server did not stop within {grace:?}");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
