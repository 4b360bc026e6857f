//! Save and restore the content buffer to a single flat file.
//!
//! The file holds the raw content bytes: no header, no metadata. Every save
//! overwrites it wholesale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::errors::SnapshotError;
use crate::metrics::{SNAPSHOT_RESTORES_TOTAL, SNAPSHOT_SAVES_TOTAL};
use crate::state::SharedState;

/// Default snapshot file name, relative to the working directory.
pub const DEFAULT_SNAPSHOT_FILE: &str = "boardcast.txt";

/// File-backed snapshot of the shared content.
#[derive(Clone, Debug)]
pub struct SnapshotManager {
    path: PathBuf,
}

impl SnapshotManager {
    /// Snapshot stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current content to the snapshot file. Returns the bytes written.
    pub async fn save(&self, state: &SharedState) -> Result<usize, SnapshotError> {
        let content = state.content();
        match tokio::fs::write(&self.path, content.as_bytes()).await {
            Ok(()) => {
                counter!(SNAPSHOT_SAVES_TOTAL, "result" => "ok").increment(1);
                info!(path = %self.path.display(), bytes = content.len(), "snapshot saved");
                Ok(content.len())
            }
            Err(source) => {
                counter!(SNAPSHOT_SAVES_TOTAL, "result" => "error").increment(1);
                warn!(path = %self.path.display(), error = %source, "snapshot save failed");
                Err(SnapshotError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Read the snapshot file without touching the live content.
    pub async fn load(&self) -> Result<String, SnapshotError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SnapshotError::Read {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the content with the snapshot and queue it for every client.
    ///
    /// There is no sender on a restore, so the broadcast reaches all registered
    /// connections. It goes through the broadcast queue behind any pending
    /// updates and waits for room rather than being dropped. Returns the
    /// number of bytes restored.
    pub async fn restore(
        &self,
        state: &SharedState,
        dispatcher: &Dispatcher,
    ) -> Result<usize, SnapshotError> {
        let content: Arc<str> = match self.load().await {
            Ok(text) => Arc::from(text),
            Err(e) => {
                counter!(SNAPSHOT_RESTORES_TOTAL, "result" => "error").increment(1);
                warn!(error = %e, "snapshot restore failed");
                return Err(e);
            }
        };
        let bytes = content.len();
        let queued = dispatcher.publish_to_all(state, content).await;
        counter!(SNAPSHOT_RESTORES_TOTAL, "result" => "ok").increment(1);
        info!(
            path = %self.path.display(),
            bytes,
            queued,
            clients = state.len(),
            "snapshot restored"
        );
        Ok(bytes)
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_FILE)
    }
}
