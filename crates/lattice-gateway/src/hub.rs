//! Instance-wide dispatch.
//!
//! One [`Hub`] runs per gateway process. Its loop is the single owner of the
//! local client table; everything else talks to it over four bounded
//! channels, surfaced through the cloneable [`HubHandle`]:
//!
//! - **Register** — a freshly upgraded connection announces itself
//! - **Unregister** — a connection leaves (any teardown path)
//! - **Send** — a locally read frame heading for the fleet
//! - **Read** — a broker delivery heading for local sockets
//!
//! The send chain and its absorb check are synchronous and run in the loop,
//! so the absorb flag attributes to exactly the message whose chain set it.
//! The routing tail — presence lookups and publishes — runs on its own task
//! per message so a slow lookup cannot stall registration or local delivery.
//! The table itself is only ever touched from the loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lattice_core::{ClusterContext, Engine, Message};

/// Depth of the four hub channels.
const HUB_CHANNEL_DEPTH: usize = 256;

/// How often a registered client's presence lease is re-issued. Must stay
/// well under the lease TTL or presence flaps between renewals.
const LEASE_RENEW_PERIOD: Duration = Duration::from_secs(10);

/// What the hub keeps per locally terminated socket.
struct ConnectionRecord {
    serial: u64,
    writer: mpsc::Sender<Vec<u8>>,
    offline: CancellationToken,
}

/// A connection announcing itself to the hub.
pub struct Registration {
    /// The authenticated client id.
    pub client_id: String,
    /// Process-unique connection number; lets the hub tell this connection
    /// apart from a successor with the same id.
    pub serial: u64,
    /// Sender half of the connection's outbound byte channel.
    pub writer: mpsc::Sender<Vec<u8>>,
    /// Cancelled exactly once when the connection goes away; the
    /// lease-renewal task revokes and exits on it.
    pub offline: CancellationToken,
}

/// A connection leaving the hub.
pub struct Departure {
    pub client_id: String,
    /// Must match the table entry; a stale departure arriving after a
    /// takeover is ignored.
    pub serial: u64,
}

/// Cloneable front of the hub channels.
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) register_tx: mpsc::Sender<Registration>,
    pub(crate) unregister_tx: mpsc::Sender<Departure>,
    pub(crate) send_tx: mpsc::Sender<Message>,
    pub(crate) read_tx: mpsc::Sender<Message>,
}

impl HubHandle {
    /// Hands a new connection to the hub.
    pub async fn register(&self, registration: Registration) {
        let _ = self.register_tx.send(registration).await;
    }

    /// Tells the hub a connection is gone.
    pub async fn unregister(&self, departure: Departure) {
        let _ = self.unregister_tx.send(departure).await;
    }

    /// Queues a locally read message for cluster dispatch.
    pub async fn send(&self, message: Message) {
        let _ = self.send_tx.send(message).await;
    }

    /// Queues a broker delivery for local delivery.
    pub async fn read(&self, message: Message) {
        let _ = self.read_tx.send(message).await;
    }
}

/// The per-instance dispatch loop and its client table.
pub struct Hub {
    clients: HashMap<String, ConnectionRecord>,
    engine: Arc<Engine>,
    ctx: ClusterContext,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Departure>,
    send_rx: mpsc::Receiver<Message>,
    read_rx: mpsc::Receiver<Message>,
}

impl Hub {
    /// Creates the hub and its handle. Call [`run`](Self::run) on a task of
    /// its own.
    pub fn new(engine: Arc<Engine>, ctx: ClusterContext) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(HUB_CHANNEL_DEPTH);
        let (unregister_tx, unregister_rx) = mpsc::channel(HUB_CHANNEL_DEPTH);
        let (send_tx, send_rx) = mpsc::channel(HUB_CHANNEL_DEPTH);
        let (read_tx, read_rx) = mpsc::channel(HUB_CHANNEL_DEPTH);

        let hub = Self {
            clients: HashMap::new(),
            engine,
            ctx,
            register_rx,
            unregister_rx,
            send_rx,
            read_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            send_tx,
            read_tx,
        };
        (hub, handle)
    }

    /// Services the four channels until the process shutdown token fires.
    pub async fn run(mut self) {
        loop {
            // Biased so table changes win over traffic: a delivery queued
            // behind its own connection's registration must not be dispatched
            // against the pre-registration table.
            tokio::select! {
                biased;
                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(departure) = self.unregister_rx.recv() => self.unregister(departure),
                Some(message) = self.send_rx.recv() => self.dispatch_send(message),
                Some(message) = self.read_rx.recv() => self.deliver_local(message),
                _ = self.ctx.shutdown().cancelled() => break,
            }
        }

        for (client_id, record) in self.clients.drain() {
            debug!(client_id = %client_id, "closing connection on shutdown");
            record.offline.cancel();
        }
    }

    /// Inserts a connection, taking over from any prior holder of the id.
    fn register(&mut self, registration: Registration) {
        if let Some(prior) = self.clients.remove(&registration.client_id) {
            info!(
                client_id = %registration.client_id,
                old_serial = prior.serial,
                new_serial = registration.serial,
                "taking over existing connection",
            );
            // Dropping the prior writer closes its channel; the offline
            // token stops its lease renewal. Takeover precedes insertion.
            prior.offline.cancel();
        }

        tokio::spawn(renew_presence(
            self.ctx.clone(),
            self.engine.config().pong_time,
            registration.client_id.clone(),
            self.engine.config().instance_address(),
            registration.offline.clone(),
        ));

        debug!(client_id = %registration.client_id, serial = registration.serial, "connection registered");
        self.clients.insert(
            registration.client_id.clone(),
            ConnectionRecord {
                serial: registration.serial,
                writer: registration.writer,
                offline: registration.offline,
            },
        );
    }

    /// Removes a connection if the serial still matches the table entry.
    fn unregister(&mut self, departure: Departure) {
        let current = self
            .clients
            .get(&departure.client_id)
            .is_some_and(|record| record.serial == departure.serial);
        if !current {
            debug!(
                client_id = %departure.client_id,
                serial = departure.serial,
                "stale unregister ignored",
            );
            return;
        }

        // Removal drops the writer, closing the write channel; this is the
        // only close path, so it happens exactly once.
        if let Some(record) = self.clients.remove(&departure.client_id) {
            record.offline.cancel();
        }
        info!(client_id = %departure.client_id, "connection unregistered");
    }

    /// Runs the send chain and absorb check, then hands routing to a task.
    ///
    /// Both steps are synchronous and cheap, and running them here is what
    /// ties the absorb flag to this message: two concurrent chains reading a
    /// shared flag could suppress the wrong one. Only the I/O-bound routing
    /// tail leaves the loop.
    fn dispatch_send(&self, message: Message) {
        let Some(message) = self.engine.run_send_chain(&self.ctx, message) else {
            debug!("send chain dropped message");
            return;
        };
        if self.engine.take_absorbed() {
            debug!(source_id = %message.source_id, "message absorbed by send chain");
            return;
        }
        tokio::spawn(route(self.ctx.clone(), message));
    }

    /// Runs the receive chain, then fans a delivery out to local sockets.
    fn deliver_local(&mut self, message: Message) {
        let Some(message) = self.engine.run_receive_chain(&self.ctx, message) else {
            debug!("receive chain dropped message");
            return;
        };

        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode message for delivery");
                return;
            }
        };

        for target in &message.target_ids {
            let Some(record) = self.clients.get(target) else {
                // The broker should only hand us our own clients.
                debug!(client_id = %target, "target not local, ignoring");
                continue;
            };
            match record.writer.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = %target, "write channel full, dropping payload");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client_id = %target, "write channel already closed");
                }
            }
        }
    }
}

/// Send-side routing: presence grouping and publish, for a message the send
/// chain has already passed.
///
/// Runs on its own task; only reads shared state, never the client table.
async fn route(ctx: ClusterContext, message: Message) {
    let mut located = Vec::new();
    let mut seen = HashSet::new();
    for target in &message.target_ids {
        if !seen.insert(target.as_str()) {
            continue;
        }
        match ctx.presence().locate(target).await {
            Ok(Some(addr)) => located.push((target.clone(), addr)),
            Ok(None) => debug!(client_id = %target, "no presence entry, dropping target"),
            Err(error) => {
                warn!(%error, "presence lookup failed, abandoning message");
                return;
            }
        }
    }

    for (instance, target_ids) in group_by_instance(located) {
        let routed = message.with_targets(target_ids);
        let payload = match routed.to_bytes() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode message for publish");
                return;
            }
        };
        if let Err(error) = ctx.bus().publish(&instance, &payload).await {
            warn!(instance = %instance, %error, "publish failed, abandoning");
        }
    }
}

/// Groups located targets by owning instance, preserving first-appearance
/// order of instances and of ids within each group.
fn group_by_instance(located: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for (client_id, instance) in located {
        match groups.iter_mut().find(|(addr, _)| *addr == instance) {
            Some((_, ids)) => ids.push(client_id),
            None => groups.push((instance, vec![client_id])),
        }
    }
    groups
}

/// Keeps one client's presence alive: an immediate bind, then a fresh lease
/// every period. A fresh lease instead of a keep-alive means one failed
/// renewal heals at the next tick. Revokes and exits on the offline signal.
async fn renew_presence(
    ctx: ClusterContext,
    ttl_secs: i64,
    client_id: String,
    instance_addr: String,
    offline: CancellationToken,
) {
    let mut lease = match ctx.presence().bind(ttl_secs, &client_id, &instance_addr).await {
        Ok(id) => Some(id),
        Err(error) => {
            warn!(client_id = %client_id, %error, "initial presence bind failed");
            None
        }
    };

    let mut ticker = tokio::time::interval(LEASE_RENEW_PERIOD);
    ticker.tick().await; // the first tick fires immediately; the bind above covered it

    loop {
        tokio::select! {
            _ = offline.cancelled() => {
                if let Some(id) = lease
                    && let Err(error) = ctx.presence().release(id).await
                {
                    warn!(client_id = %client_id, %error, "presence release failed");
                }
                return;
            }
            _ = ticker.tick() => {
                match ctx.presence().bind(ttl_secs, &client_id, &instance_addr).await {
                    Ok(id) => lease = Some(id),
                    Err(error) => {
                        warn!(client_id = %client_id, %error, "presence renewal failed");
                    }
                }
            }
        }
    }
}
