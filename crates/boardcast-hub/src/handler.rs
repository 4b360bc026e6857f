//! Per-connection handler: register and seed, read loop, teardown.
//!
//! Each upgraded socket is split into a reader (this task) and a writer task
//! that drains the connection's outbound queue. Whichever side fails first
//! ends the connection; both paths converge on [`Hub::disconnect`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{Connection, ConnectionId, Outbound};
use crate::errors::SendError;
use crate::hub::Hub;

/// How long the writer may spend on the closing frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);
/// How long teardown waits for the writer task before aborting it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a connection ended. Only used for logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a normal-closure frame.
    Normal,
    /// Peer is going away (page closed or navigated).
    GoingAway,
    /// Peer closed without a status code, or the stream ended.
    NoStatus,
    /// Peer closed with another status code.
    Remote {
        /// Close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// Read failed (protocol violation, reset).
    Abnormal(String),
    /// Writing to the socket failed.
    WriteFailed(String),
    /// The initial content could not be queued.
    SeedFailed(SendError),
    /// Closed from our side (liveness eviction, slow client, shutdown).
    ServerClosed,
}

impl CloseReason {
    /// Classify a received close frame.
    pub fn from_frame(frame: Option<&CloseFrame>) -> Self {
        match frame {
            None => Self::NoStatus,
            Some(frame) if frame.code == close_code::NORMAL => Self::Normal,
            Some(frame) if frame.code == close_code::AWAY => Self::GoingAway,
            Some(frame) => Self::Remote {
                code: frame.code,
                reason: frame.reason.as_str().to_owned(),
            },
        }
    }

    /// Whether this is an orderly close.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            Self::Normal | Self::GoingAway | Self::NoStatus | Self::ServerClosed
        )
    }
}

/// Drive one upgraded WebSocket until it closes.
#[instrument(skip_all, fields(conn_id))]
pub async fn serve_connection(hub: Arc<Hub>, socket: WebSocket) {
    let (tx, rx) = mpsc::channel(hub.config().outbound_capacity);
    let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
    let _ = tracing::Span::current().record("conn_id", conn.id().as_str());

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, rx, conn.closed_token()));
    let mut writer_done = false;

    let reason = match hub.register(&conn) {
        Err(e) => CloseReason::SeedFailed(e),
        Ok(()) => {
            debug!("connection open");
            tokio::select! {
                reason = read_loop(stream, &hub, &conn) => reason,
                joined = &mut writer => {
                    writer_done = true;
                    match joined {
                        Ok(Ok(())) => CloseReason::ServerClosed,
                        Ok(Err(e)) => CloseReason::WriteFailed(e),
                        Err(e) => CloseReason::WriteFailed(e.to_string()),
                    }
                }
            }
        }
    };

    if reason.is_graceful() {
        info!(?reason, "connection closed normally");
    } else {
        warn!(?reason, "connection closed unexpectedly");
    }

    let _ = conn.begin_closing();
    let _ = hub.disconnect(&conn);

    if !writer_done
        && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
    {
        debug!("writer did not finish, aborting");
        writer.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    conn: &Connection,
) -> CloseReason {
    loop {
        let next = tokio::select! {
            biased;
            () = conn.closed() => return CloseReason::ServerClosed,
            next = stream.next() => next,
        };
        let message = match next {
            None => return CloseReason::NoStatus,
            Some(Err(e)) => return CloseReason::Abnormal(e.to_string()),
            Some(Ok(message)) => message,
        };
        conn.mark_alive();
        match message {
            Message::Text(text) => {
                let _ = hub.ingest(conn.id(), text.as_str());
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = hub.ingest(conn.id(), text);
                }
                Err(e) => {
                    warn!(bytes = data.len(), error = %e, "ignoring non-UTF-8 binary frame");
                }
            },
            Message::Close(frame) => return CloseReason::from_frame(frame.as_ref()),
            // Pings are answered by the transport; pongs only refresh liveness.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Drain the outbound queue into the socket until closed or a write fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
) -> Result<(), String> {
    let result = loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => break Ok(()),
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break Ok(()) };

        let (message, ack) = match frame {
            Outbound::Text(payload) => (Message::Text(payload.to_string().into()), None),
            Outbound::Ping(ack) => (Message::Ping(Vec::<u8>::new().into()), Some(ack)),
        };
        let sent = tokio::select! {
            biased;
            () = closed.cancelled() => break Ok(()),
            sent = sink.send(message) => sent.map_err(|e| e.to_string()),
        };
        if let Some(ack) = ack {
            let _ = ack.send(sent.clone());
        }
        if let Err(e) = sent {
            break Err(e);
        }
    };

    if result.is_ok() {
        let close = sink.send(Message::Close(None));
        let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u16, reason: &str) -> CloseFrame {
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }

    #[test]
    fn normal_close_is_graceful() {
        let reason = CloseReason::from_frame(Some(&frame(close_code::NORMAL, "")));
        assert_eq!(reason, CloseReason::Normal);
        assert!(reason.is_graceful());
    }

    #[test]
    fn going_away_is_graceful() {
        let reason = CloseReason::from_frame(Some(&frame(close_code::AWAY, "tab closed")));
        assert_eq!(reason, CloseReason::GoingAway);
        assert!(reason.is_graceful());
    }

    #[test]
    fn missing_frame_is_no_status() {
        let reason = CloseReason::from_frame(None);
        assert_eq!(reason, CloseReason::NoStatus);
        assert!(reason.is_graceful());
    }

    #[test]
    fn other_codes_are_not_graceful() {
        let reason = CloseReason::from_frame(Some(&frame(close_code::POLICY, "nope")));
        assert_eq!(
            reason,
            CloseReason::Remote {
                code: close_code::POLICY,
                reason: "nope".into()
            }
        );
        assert!(!reason.is_graceful());
    }

    #[test]
    fn failures_are_not_graceful() {
        assert!(!CloseReason::Abnormal("reset".into()).is_graceful());
        assert!(!CloseReason::WriteFailed("broken pipe".into()).is_graceful());
        assert!(!CloseReason::SeedFailed(SendError::Full).is_graceful());
        assert!(CloseReason::ServerClosed.is_graceful());
    }
}
