//! Client connection identity, outbound queue, and lifecycle state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{ProbeError, SendError};

/// Opaque connection identity, used as registry key and broadcast sender.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh, unique ID.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame queued for the connection's socket writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Text payload.
    Text(Arc<str>),
    /// Ping control frame. The writer reports whether the frame reached the transport.
    Ping(oneshot::Sender<Result<(), String>>),
}

/// Connection lifecycle. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, not yet registered.
    Connecting,
    /// Registered and receiving broadcasts.
    Open,
    /// Teardown started (read error or write failure).
    Closing,
    /// Removed from the registry and transport closed.
    Closed,
}

/// A live duplex connection to one client.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    state: Mutex<ConnectionState>,
    /// Cancelled exactly once, on the transition to `Closed`.
    closed: CancellationToken,
    connected_at: Instant,
    /// Last pong or inbound frame.
    last_seen: Mutex<Instant>,
    failed_writes: AtomicU64,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            state: Mutex::new(ConnectionState::Connecting),
            closed: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection reached `Closed`.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// `Connecting → Open`. Returns `false` if the connection already left `Connecting`.
    pub fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    /// `Connecting | Open → Closing`. Returns `false` if teardown already started.
    pub fn begin_closing(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    /// Move to `Closed` and signal the reader and writer loops to stop.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn transition_to_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Closed;
        self.closed.cancel();
        true
    }

    /// Token cancelled when the connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Enqueue a text payload without blocking.
    pub fn send_text(&self, payload: Arc<str>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let result = self.tx.try_send(Outbound::Text(payload)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        });
        if result.is_err() {
            let _ = self.failed_writes.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Send a ping and wait for the writer to confirm it reached the transport.
    pub async fn probe(&self, deadline: Duration) -> Result<(), ProbeError> {
        if self.is_closed() {
            return Err(ProbeError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let attempt = async {
            self.tx
                .send(Outbound::Ping(ack_tx))
                .await
                .map_err(|_| ProbeError::Closed)?;
            match ack_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(ProbeError::Transport(reason)),
                Err(_) => Err(ProbeError::Closed),
            }
        };
        tokio::time::timeout(deadline, attempt)
            .await
            .map_err(|_| ProbeError::TimedOut(deadline))?
    }

    /// Record a pong or inbound frame.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last pong or inbound frame (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Writes that could not be enqueued.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::from("c1"), tx), rx)
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[test]
    fn starts_connecting() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_closed());
    }

    #[test]
    fn lifecycle_transitions() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        assert!(conn.transition_to_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn transition_to_closed_only_once() {
        let (conn, _rx) = make_connection(4);
        let token = conn.closed_token();
        assert!(conn.transition_to_closed());
        assert!(!conn.transition_to_closed());
        assert!(token.is_cancelled());
        assert!(!conn.begin_closing());
    }

    #[tokio::test]
    async fn send_text_enqueues() {
        let (conn, mut rx) = make_connection(4);
        conn.send_text(Arc::from("hello")).unwrap();
        assert_matches!(rx.recv().await, Some(Outbound::Text(t)) if &*t == "hello");
    }

    #[test]
    fn send_text_full_queue() {
        let (conn, _rx) = make_connection(1);
        conn.send_text(Arc::from("a")).unwrap();
        assert_eq!(conn.send_text(Arc::from("b")), Err(SendError::Full));
        assert_eq!(conn.failed_writes(), 1);
    }

    #[test]
    fn send_text_after_writer_gone() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send_text(Arc::from("a")), Err(SendError::Closed));
    }

    #[test]
    fn send_text_after_close() {
        let (conn, _rx) = make_connection(4);
        let _ = conn.transition_to_closed();
        assert_eq!(conn.send_text(Arc::from("a")), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn probe_acknowledged() {
        let (conn, mut rx) = make_connection(4);
        let writer = tokio::spawn(async move {
            if let Some(Outbound::Ping(ack)) = rx.recv().await {
                let _ = ack.send(Ok(()));
            }
        });
        assert_eq!(conn.probe(Duration::from_secs(1)).await, Ok(()));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn probe_transport_failure() {
        let (conn, mut rx) = make_connection(4);
        let _writer = tokio::spawn(async move {
            if let Some(Outbound::Ping(ack)) = rx.recv().await {
                let _ = ack.send(Err("broken pipe".into()));
            }
        });
        assert_matches!(
            conn.probe(Duration::from_secs(1)).await,
            Err(ProbeError::Transport(reason)) if reason == "broken pipe"
        );
    }

    #[tokio::test]
    async fn probe_writer_gone() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(
            conn.probe(Duration::from_secs(1)).await,
            Err(ProbeError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_times_out_when_unacknowledged() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(
            conn.probe(Duration::from_secs(5)).await,
            Err(ProbeError::TimedOut(Duration::from_secs(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mark_alive_resets_idle() {
        let (conn, _rx) = make_connection(4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(conn.idle_for() >= Duration::from_secs(10));
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_secs(1));
    }
}
