//! Shared content buffer and connection registry behind one lock.
//!
//! Both live in a single `RwLock` so "read the current content" and
//! "enumerate the current clients" observe a consistent order against
//! concurrent mutation. Nothing here awaits or touches a socket while the
//! lock is held: writes to a connection are non-blocking queue pushes.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use tracing::info;

use crate::connection::{Connection, ConnectionId};
use crate::errors::SendError;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

struct Inner {
    content: Arc<str>,
    clients: HashMap<ConnectionId, Arc<Connection>>,
}

/// Content store and connection registry.
pub struct SharedState {
    inner: RwLock<Inner>,
}

impl SharedState {
    /// Empty content, no clients.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                content: Arc::from(""),
                clients: HashMap::new(),
            }),
        }
    }

    // ── Content store ──

    /// Current content.
    pub fn content(&self) -> Arc<str> {
        Arc::clone(&self.inner.read().content)
    }

    /// Replace the content wholesale.
    pub fn set_content(&self, content: Arc<str>) {
        self.inner.write().content = content;
    }

    /// Replace the content and run `then` before the write lock is released.
    ///
    /// Anything `then` enqueues is ordered against every other content write.
    /// `then` must not block or touch this state.
    pub fn replace_content<T>(&self, content: Arc<str>, then: impl FnOnce() -> T) -> T {
        let mut inner = self.inner.write();
        inner.content = content;
        then()
    }

    // ── Registry ──

    /// Register a connection. Returns the new client count.
    pub fn add(&self, connection: Arc<Connection>) -> usize {
        let mut inner = self.inner.write();
        let _ = inner.clients.insert(connection.id().clone(), connection);
        let count = inner.clients.len();
        drop(inner);
        record_added(count);
        count
    }

    /// Register a connection and queue the current content as its first frame.
    ///
    /// Both happen under the write lock, so no broadcast can reach the
    /// connection ahead of the seed. Empty content is not sent. On a seed
    /// failure the connection stays registered; the caller tears it down.
    pub fn add_and_seed(&self, connection: &Arc<Connection>) -> Result<usize, SendError> {
        let mut inner = self.inner.write();
        let _ = inner
            .clients
            .insert(connection.id().clone(), Arc::clone(connection));
        let count = inner.clients.len();
        let seeded = if inner.content.is_empty() {
            Ok(())
        } else {
            connection.send_text(Arc::clone(&inner.content))
        };
        drop(inner);
        record_added(count);
        seeded.map(|()| count)
    }

    /// Unregister a connection. Removing an absent ID is a no-op returning `false`.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.clients.remove(id).is_some();
        let count = inner.clients.len();
        drop(inner);
        if removed {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
        }
        removed
    }

    /// Point-in-time copy of the registered connections.
    pub fn snapshot_clients(&self) -> Vec<Arc<Connection>> {
        self.inner.read().clients.values().cloned().collect()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().clients.contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().clients.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single teardown routine: unregister and close the transport.
    ///
    /// Safe to call from any error path, any number of times. Returns `true`
    /// only for the call that closed the connection.
    pub fn disconnect(&self, connection: &Connection) -> bool {
        let _ = self.remove(connection.id());
        let closed = connection.transition_to_closed();
        if closed {
            info!(
                conn_id = %connection.id(),
                clients = self.len(),
                age_secs = connection.age().as_secs(),
                failed_writes = connection.failed_writes(),
                "client disconnected"
            );
        }
        closed
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

fn record_added(count: usize) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
    info!(clients = count, "client connected");
}
