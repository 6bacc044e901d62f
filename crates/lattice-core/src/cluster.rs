//! Cluster capability traits and the shared context.
//!
//! The hub never talks to etcd or AMQP directly; it goes through the
//! [`Presence`] and [`MessageBus`] capabilities. `lattice-cluster` provides
//! the production implementations, tests provide in-memory ones.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClusterResult;

/// Identifier of one registry lease.
pub type LeaseId = i64;

/// The presence registry: a leased binding from client id to the address of
/// the instance terminating that client's socket.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Writes `client_id -> instance_addr` under a fresh lease of `ttl_secs`
    /// seconds and returns the lease id.
    async fn bind(
        &self,
        ttl_secs: i64,
        client_id: &str,
        instance_addr: &str,
    ) -> ClusterResult<LeaseId>;

    /// Revokes a lease, deleting the entry it carried.
    async fn release(&self, lease: LeaseId) -> ClusterResult<()>;

    /// Extends a lease once. The renewal loop prefers re-issuing a fresh
    /// lease via [`bind`](Presence::bind), which also recovers from
    /// intermittent registry errors; this exists for callers that want the
    /// cheaper path.
    async fn refresh(&self, lease: LeaseId) -> ClusterResult<()>;

    /// Resolves a client id to the address of the owning instance, or `None`
    /// when the client has no presence entry anywhere in the fleet.
    async fn locate(&self, client_id: &str) -> ClusterResult<Option<String>>;
}

/// The inter-instance message bus: one durable work queue per instance,
/// named by that instance's address.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a payload onto `queue`, declaring it if needed.
    async fn publish(&self, queue: &str, payload: &[u8]) -> ClusterResult<()>;

    /// Opens a prefetch-1, manual-ack consumer on `queue`. Deliveries arrive
    /// on the returned channel; each must be acked once it has been handed
    /// to the hub.
    async fn consume(&self, queue: &str) -> ClusterResult<mpsc::Receiver<Delivery>>;
}

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> ClusterResult<()>;
}

/// One message taken from an instance work queue.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    /// A delivery that needs no acknowledgement. Used by in-memory buses.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    /// A delivery that must be acked back to the broker.
    pub fn with_acker(payload: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledges the delivery. At-least-once: a crash between handing the
    /// message to the hub and this call yields a redelivery.
    pub async fn ack(mut self) -> ClusterResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.payload.len())
            .field("acked", &self.acker.is_none())
            .finish()
    }
}

/// Bundles the cluster capabilities with the process shutdown token.
///
/// Initialized once at startup and passed down explicitly; cloning is cheap
/// and shares the underlying clients and token.
#[derive(Clone)]
pub struct ClusterContext {
    presence: Arc<dyn Presence>,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
}

impl ClusterContext {
    /// Creates a context with a fresh shutdown token.
    pub fn new(presence: Arc<dyn Presence>, bus: Arc<dyn MessageBus>) -> Self {
        Self::with_shutdown(presence, bus, CancellationToken::new())
    }

    /// Creates a context scoped to an existing shutdown token.
    pub fn with_shutdown(
        presence: Arc<dyn Presence>,
        bus: Arc<dyn MessageBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            presence,
            bus,
            shutdown,
        }
    }

    /// The presence registry.
    pub fn presence(&self) -> &dyn Presence {
        self.presence.as_ref()
    }

    /// The message bus.
    pub fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    /// The process-wide shutdown token. Cancelled exactly once, on graceful
    /// shutdown.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}
