//! Push-feed connection manager.
//!
//! Owns exactly one WebSocket connection to the backend feed. On every
//! successful open it announces the station identity, then pumps inbound
//! snapshots toward the engine and outbound intents onto the wire. On error
//! or close it waits a fixed delay and reconnects — forever, because the
//! display runs unattended and there is no meaningful give-up state.
//!
//! Outbound delivery is fire-and-forget: while the socket is not open,
//! intents are drained and dropped without failing the caller. The next
//! authoritative snapshot after reconnect is the recovery path. Malformed
//! inbound frames are counted, logged, and discarded at this boundary so
//! they can never reach the store half-parsed.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{OutboundMessage, Snapshot};

/// Connection lifecycle, observable by the presentation layer for its
/// transient "reconnecting" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRetrying,
}

pub struct ConnectionManager {
    feed_url: String,
    station_name: String,
    reconnect_delay: Duration,
    inbound: mpsc::UnboundedSender<Snapshot>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    malformed_frames: u64,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed_url: String,
        station_name: String,
        reconnect_delay: Duration,
        inbound: mpsc::UnboundedSender<Snapshot>,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        (
            Self {
                feed_url,
                station_name,
                reconnect_delay,
                inbound,
                outbound,
                state,
                cancel,
                malformed_frames: 0,
            },
            state_rx,
        )
    }

    /// Connect-pump-retry loop. Returns only on cancellation.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.state.send_replace(ConnectionState::Connecting);

            let attempt = connect_async(self.feed_url.clone());
            if let Some((stream, _)) =
                connect_wait(attempt, &mut self.outbound, &self.cancel).await
            {
                info!(url = %self.feed_url, station = %self.station_name, "Feed connected");
                self.state.send_replace(ConnectionState::Open);
                self.pump(stream).await;
            }

            if self.cancel.is_cancelled() {
                return;
            }
            self.state.send_replace(ConnectionState::ClosedRetrying);
            warn!(
                delay_secs = self.reconnect_delay.as_secs(),
                "Feed closed, reconnecting after delay"
            );
            if !retry_wait(self.reconnect_delay, &mut self.outbound, &self.cancel).await {
                return;
            }
        }
    }

    /// Pump one open socket until it errors, closes, or we are cancelled.
    async fn pump(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut sink, mut source) = stream.split();

        // Re-announce identity on every (re)connect so the backend routes
        // the right station's tickets at us.
        let hello = OutboundMessage::InitStation {
            name: self.station_name.clone(),
        };
        if sink.send(Message::Text(hello.to_wire())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => match Snapshot::parse(&text) {
                        Ok(snapshot) => {
                            if self.inbound.send(snapshot).is_err() {
                                // Engine gone; nothing left to feed.
                                return;
                            }
                        }
                        Err(e) => {
                            self.malformed_frames += 1;
                            warn!(
                                error = %e,
                                total = self.malformed_frames,
                                "Discarding malformed feed frame"
                            );
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Feed closed the connection");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Feed read error");
                        return;
                    }
                },
                intent = self.outbound.recv() => match intent {
                    Some(message) => {
                        if sink.send(Message::Text(message.to_wire())).await.is_err() {
                            warn!("Feed write failed, recycling connection");
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }
}

/// Drive one connection attempt to completion. Against an unreachable host
/// the attempt can hang for tens of seconds, and intents submitted in that
/// window must be dropped, not queued for replay on the next open — so the
/// outbound channel is drained here exactly as during [`retry_wait`].
/// Returns None on connect failure or cancellation.
async fn connect_wait<T, F>(
    connect: F,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: &CancellationToken,
) -> Option<T>
where
    F: std::future::Future<Output = Result<T, tokio_tungstenite::tungstenite::Error>>,
{
    tokio::pin!(connect);
    loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(error = %e, "Feed connect failed");
                    return None;
                }
            },
            _ = cancel.cancelled() => return None,
            intent = outbound.recv() => match intent {
                Some(message) => {
                    debug!(?message, "Feed not open, dropping outbound intent");
                }
                None => {
                    // Engine gone; just finish the wait via cancellation.
                    cancel.cancelled().await;
                    return None;
                }
            },
        }
    }
}

/// Wait out the fixed reconnect delay. Outbound intents arriving while the
/// socket is down are drained and dropped here so `send` never fails its
/// caller. Returns false when cancelled.
async fn retry_wait(
    delay: Duration,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = cancel.cancelled() => return false,
            intent = outbound.recv() => match intent {
                Some(message) => {
                    debug!(?message, "Feed not open, dropping outbound intent");
                }
                None => {
                    // Engine gone; just finish the wait via cancellation.
                    cancel.cancelled().await;
                    return false;
                }
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
