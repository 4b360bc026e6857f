//! Bounded broadcast queue with a single fan-out worker.
//!
//! Producers (connection read loops) never wait: `publish` is a `try_send`
//! and a full queue drops the newest message. Restores wait for room instead
//! of dropping. Both replace the content and enqueue under the state write
//! lock, so queue order is content order. The worker drains the queue in
//! FIFO order and writes each payload to every registered connection except
//! the sender.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::metrics::{BROADCAST_DROPS_TOTAL, BROADCAST_PUBLISHED_TOTAL, WS_WRITE_FAILURES_TOTAL};
use crate::state::SharedState;

/// A payload to fan out, tagged with the connection that sent it.
#[derive(Clone, Debug)]
pub struct BroadcastMessage {
    /// Raw payload.
    pub payload: Arc<str>,
    /// Originating connection, excluded from delivery. `None` reaches everyone.
    pub sender: Option<ConnectionId>,
}

impl BroadcastMessage {
    /// An update from `sender`.
    pub fn from_sender(payload: Arc<str>, sender: ConnectionId) -> Self {
        Self {
            payload,
            sender: Some(sender),
        }
    }

    /// A message with no sender, delivered to every connection.
    pub fn to_all(payload: Arc<str>) -> Self {
        Self {
            payload,
            sender: None,
        }
    }

    fn sender_label(&self) -> &str {
        self.sender.as_ref().map_or("-", ConnectionId::as_str)
    }
}

/// Producer side of the broadcast queue.
pub struct Dispatcher {
    tx: mpsc::Sender<BroadcastMessage>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Dispatcher {
    /// Create the queue. The receiver goes to [`run_dispatcher`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dispatcher = Self {
            tx,
            capacity,
            dropped: AtomicU64::new(0),
        };
        (dispatcher, rx)
    }

    /// Enqueue without blocking. Returns `false` if the message was dropped.
    pub fn publish(&self, message: BroadcastMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                counter!(BROADCAST_PUBLISHED_TOTAL).increment(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(BROADCAST_DROPS_TOTAL).increment(1);
                warn!(
                    sender = message.sender_label(),
                    capacity = self.capacity,
                    dropped,
                    "broadcast queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sender = message.sender_label(),
                    "dispatcher stopped, dropping message"
                );
                false
            }
        }
    }

    /// Replace the content with `payload` and enqueue it under one write lock.
    ///
    /// Never blocks. Returns `false` if the broadcast was dropped; the
    /// content is replaced either way.
    pub fn publish_update(
        &self,
        state: &SharedState,
        payload: Arc<str>,
        sender: ConnectionId,
    ) -> bool {
        state.replace_content(Arc::clone(&payload), || {
            self.publish(BroadcastMessage::from_sender(payload, sender))
        })
    }

    /// Replace the content with `payload` and enqueue it for every connection.
    ///
    /// Waits for queue room instead of dropping. The slot is reserved before
    /// the write lock is taken, and the content is replaced and the message
    /// enqueued under that lock. Returns `false` if the worker is gone, in
    /// which case only the content is replaced.
    pub async fn publish_to_all(&self, state: &SharedState, payload: Arc<str>) -> bool {
        let permit = self.tx.reserve().await.ok();
        state.replace_content(Arc::clone(&payload), move || match permit {
            Some(permit) => {
                permit.send(BroadcastMessage::to_all(payload));
                counter!(BROADCAST_PUBLISHED_TOTAL).increment(1);
                true
            }
            None => {
                warn!("dispatcher stopped, broadcast to all skipped");
                false
            }
        })
    }

    /// Messages dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Worker loop: drain the queue until cancelled or all producers are gone.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<BroadcastMessage>,
    state: Arc<SharedState>,
    cancel: CancellationToken,
) {
    debug!("dispatcher started");
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else { break };
        let _ = deliver(&state, &message);
    }
    info!(pending = rx.len(), "dispatcher stopped");
}

/// Fan one message out to every registered connection except its sender.
///
/// Messages without a sender reach every connection. Returns the number of
/// connections the payload was queued to.
pub fn deliver(state: &SharedState, message: &BroadcastMessage) -> usize {
    let payload = &message.payload;
    let mut delivered = 0;
    for conn in state.snapshot_clients() {
        if message.sender.as_ref() == Some(conn.id()) {
            continue;
        }
        match conn.send_text(Arc::clone(payload)) {
            Ok(()) => delivered += 1,
            Err(e) => {
                counter!(WS_WRITE_FAILURES_TOTAL).increment(1);
                warn!(conn_id = %conn.id(), error = %e, "write failed, removing client");
                let _ = state.disconnect(&conn);
            }
        }
    }
    debug!(recipients = delivered, bytes = payload.len(), "broadcast delivered");
    delivered
}
