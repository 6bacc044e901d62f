//! Per-socket lifecycle.
//!
//! Every accepted WebSocket runs three tasks: the reader (the upgrade future
//! itself), the writer, and a broker consumer; the hub additionally runs a
//! lease-renewal task for it. All four stop through the connection's offline
//! token, and every failure path funnels into one idempotent teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lattice_core::{ClusterContext, ClusterError, ClusterResult, Engine, Message};

use crate::hub::{Departure, HubHandle, Registration};

/// Time allowed between pongs before the peer is considered gone.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence. Held at 90% of [`PONG_WAIT`] so a ping is always in flight
/// well before the read deadline can expire; do not shrink the gap.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Budget for any single socket write, pings included.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Largest inbound frame accepted, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Depth of the outbound byte channel.
pub const WRITE_CHANNEL_DEPTH: usize = 2048;

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, identity not yet established.
    Accepted,
    /// Token validated (or auth disabled and the id taken from the query).
    Authenticated,
    /// Handed to the hub; presence lease being established.
    Registered,
    /// Reader, writer and consumer running.
    Active,
    /// Teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

/// Shared identity and teardown guard for one socket's tasks.
pub struct Connection {
    client_id: String,
    serial: u64,
    hub: HubHandle,
    offline: CancellationToken,
    state: Mutex<ConnectionState>,
    closing: AtomicBool,
}

impl Connection {
    fn new(client_id: String, serial: u64, hub: HubHandle) -> Arc<Self> {
        Arc::new(Self {
            client_id,
            serial,
            hub,
            offline: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Accepted),
            closing: AtomicBool::new(false),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn transition(&self, next: ConnectionState) {
        *self.state.lock() = next;
    }

    /// Tears the connection down. Reader error, write failure, missed pong
    /// and consumer failure all race here; only the first caller acts.
    async fn teardown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transition(ConnectionState::Closing);
        self.offline.cancel();
        self.hub
            .unregister(Departure {
                client_id: self.client_id.clone(),
                serial: self.serial,
            })
            .await;
        self.transition(ConnectionState::Closed);
    }
}

/// Runs a freshly upgraded socket to completion.
///
/// Registers with the hub (which takes over any prior holder of the id),
/// spawns the writer and consumer, then reads until teardown.
pub async fn serve(
    socket: WebSocket,
    client_id: String,
    serial: u64,
    hub: HubHandle,
    ctx: ClusterContext,
    engine: Arc<Engine>,
) {
    let connection = Connection::new(client_id.clone(), serial, hub.clone());
    // Identity was established by the entry point before the upgrade.
    connection.transition(ConnectionState::Authenticated);
    let (ws_tx, ws_rx) = socket.split();
    let (writer_tx, writer_rx) = mpsc::channel(WRITE_CHANNEL_DEPTH);

    hub.register(Registration {
        client_id,
        serial,
        writer: writer_tx,
        offline: connection.offline.clone(),
    })
    .await;
    connection.transition(ConnectionState::Registered);

    tokio::spawn(write_pump(ws_tx, writer_rx, Arc::clone(&connection)));
    tokio::spawn(consume_pump(
        ctx,
        engine.config().instance_address(),
        hub,
        Arc::clone(&connection),
    ));

    connection.transition(ConnectionState::Active);
    read_pump(ws_rx, connection).await;
}

/// Reads frames until error, close or a missed pong, decoding each into a
/// [`Message`] for the hub's send channel. The single reader per socket.
async fn read_pump(mut ws_rx: SplitStream<WebSocket>, connection: Arc<Connection>) {
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        let frame = match timeout_at(deadline, ws_rx.next()).await {
            Err(_) => {
                debug!(client_id = %connection.client_id, "pong deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => {
                debug!(client_id = %connection.client_id, %error, "socket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Pong(_) => deadline = Instant::now() + PONG_WAIT,
            WsMessage::Text(text) => {
                forward_frame(text.as_bytes(), &connection).await;
            }
            WsMessage::Binary(data) => {
                forward_frame(&data, &connection).await;
            }
            // axum answers pings on its own.
            WsMessage::Ping(_) => {}
            WsMessage::Close(_) => {
                debug!(client_id = %connection.client_id, "peer closed");
                break;
            }
        }
    }
    connection.teardown().await;
}

/// Decodes one inbound frame. Malformed JSON drops the frame, not the
/// connection.
async fn forward_frame(bytes: &[u8], connection: &Connection) {
    match Message::from_bytes(bytes) {
        Ok(mut message) => {
            // The socket is authoritative for who is sending.
            message.source_id = connection.client_id.clone();
            connection.hub.send(message).await;
        }
        Err(error) => {
            debug!(client_id = %connection.client_id, %error, "malformed frame dropped");
        }
    }
}

/// Writes outbound payloads and keepalive pings.
///
/// Consecutive queued payloads are drained into one text frame separated by
/// newlines. Closure of the write channel (the hub removed us) sends a Close
/// frame and ends the task; any write failure initiates teardown.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut writer_rx: mpsc::Receiver<Vec<u8>>,
    connection: Arc<Connection>,
) {
    let mut pings = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            queued = writer_rx.recv() => match queued {
                Some(first) => {
                    let frame = coalesce(first, &mut writer_rx);
                    let text = String::from_utf8_lossy(&frame).into_owned();
                    match timeout(WRITE_WAIT, ws_tx.send(WsMessage::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => {
                            debug!(client_id = %connection.client_id, "socket write failed");
                            break;
                        }
                    }
                }
                None => {
                    let _ = timeout(WRITE_WAIT, ws_tx.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = pings.tick() => {
                match timeout(WRITE_WAIT, ws_tx.send(WsMessage::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!(client_id = %connection.client_id, "ping failed");
                        break;
                    }
                }
            }
        }
    }
    connection.teardown().await;
}

/// Drains whatever else is already queued into one frame, newline-separated,
/// so a burst of small deliveries costs a single socket write.
fn coalesce(first: Vec<u8>, writer_rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    let mut frame = first;
    while let Ok(next) = writer_rx.try_recv() {
        frame.push(b'\n');
        frame.extend_from_slice(&next);
    }
    frame
}

/// Pulls deliveries off this instance's work queue and forwards them to the
/// hub's read channel, acking each only after the hand-off. Receive-side
/// handlers run in the hub, not here.
///
/// A consumer that fails to open or stops unexpectedly leaves the connection
/// cut off from cross-instance traffic, so either tears it down.
async fn consume_pump(
    ctx: ClusterContext,
    queue: String,
    hub: HubHandle,
    connection: Arc<Connection>,
) {
    if let Err(error) = run_consumer(&ctx, &queue, &hub, &connection).await {
        warn!(queue = %queue, %error, "consumer stopped");
        connection.teardown().await;
    }
}

/// The consumer loop proper. Returns `Ok` only on the offline signal;
/// a delivery stream that ends on its own is a closed broker channel.
async fn run_consumer(
    ctx: &ClusterContext,
    queue: &str,
    hub: &HubHandle,
    connection: &Connection,
) -> ClusterResult<()> {
    let mut deliveries = ctx.bus().consume(queue).await?;

    loop {
        tokio::select! {
            _ = connection.offline.cancelled() => return Ok(()),
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else {
                    return Err(ClusterError::ChannelClosed);
                };
                match Message::from_bytes(delivery.payload()) {
                    Ok(message) => {
                        hub.read(message).await;
                        if let Err(error) = delivery.ack().await {
                            warn!(queue = %queue, %error, "delivery ack failed");
                        }
                    }
                    Err(error) => {
                        debug!(queue = %queue, %error, "malformed broker payload dropped");
                        // Ack anyway or the poison message redelivers forever.
                        let _ = delivery.ack().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hub() -> (HubHandle, mpsc::Receiver<Departure>) {
        let (register_tx, _register_rx) = mpsc::channel(8);
        let (unregister_tx, unregister_rx) = mpsc::channel(8);
        let (send_tx, _send_rx) = mpsc::channel(8);
        let (read_tx, _read_rx) = mpsc::channel(8);
        (
            HubHandle {
                register_tx,
                unregister_tx,
                send_tx,
                read_tx,
            },
            unregister_rx,
        )
    }

    #[test]
    fn coalesce_joins_queued_payloads_with_newlines() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(b"two".to_vec()).unwrap();
        tx.try_send(b"three".to_vec()).unwrap();

        let frame = coalesce(b"one".to_vec(), &mut rx);
        assert_eq!(frame, b"one\ntwo\nthree");
        // Nothing left behind.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn coalesce_passes_single_payload_through() {
        let (_tx, mut rx) = mpsc::channel::<Vec<u8>>(8);
        let frame = coalesce(b"only".to_vec(), &mut rx);
        assert_eq!(frame, b"only");
    }

    #[tokio::test]
    async fn teardown_runs_exactly_once() {
        let (hub, mut unregister_rx) = test_hub();
        let connection = Connection::new("a".into(), 3, hub);

        connection.teardown().await;
        connection.teardown().await;

        let departure = unregister_rx.recv().await.unwrap();
        assert_eq!(departure.client_id, "a");
        assert_eq!(departure.serial, 3);
        assert!(unregister_rx.try_recv().is_err());

        assert!(connection.offline.is_cancelled());
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn teardown_races_collapse_to_one_departure() {
        let (hub, mut unregister_rx) = test_hub();
        let connection = Connection::new("a".into(), 1, hub);

        let contenders: Vec<_> = (0..4)
            .map(|_| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move { connection.teardown().await })
            })
            .collect();
        for contender in contenders {
            contender.await.unwrap();
        }

        assert!(unregister_rx.recv().await.is_some());
        assert!(unregister_rx.try_recv().is_err());
    }
}
