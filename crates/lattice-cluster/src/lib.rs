//! # Lattice Cluster
//!
//! Production implementations of the cluster capabilities defined in
//! `lattice-core`:
//!
//! | Capability | Implementation | Backing service |
//! |------------|----------------|-----------------|
//! | [`Presence`](lattice_core::Presence) | [`EtcdPresence`] | etcd v3 (leased keys) |
//! | [`MessageBus`](lattice_core::MessageBus) | [`AmqpBus`] | RabbitMQ (durable work queues) |
//!
//! Both clients are connected once at startup; a connect failure there is
//! fatal for the process. After startup every operation error is transient:
//! logged by the caller, never retried in-line.

mod bus;
mod presence;

pub use bus::AmqpBus;
pub use presence::EtcdPresence;
