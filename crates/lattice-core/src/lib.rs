//! # Lattice Core
//!
//! The core of the Lattice WebSocket gateway.
//!
//! This crate provides the building blocks shared by every gateway instance:
//! the wire message model, the handler engine, and the capability traits that
//! decouple the routing plane from concrete cluster clients.
//!
//! ## Architecture
//!
//! A gateway instance terminates client sockets and cooperates with its peers
//! through two cluster services:
//!
//! ```text
//! ┌────────────┐  Send   ┌────────────┐  publish  ┌───────────────┐
//! │ Connection │────────▶│    Hub     │──────────▶│  MessageBus   │
//! │  (reader)  │         │ (dispatch) │           │ (peer queues) │
//! └────────────┘         └─────┬──────┘           └───────┬───────┘
//!                             │ locate                   │ consume
//!                       ┌─────▼──────┐            ┌──────▼──────┐
//!                       │  Presence  │            │ Connection  │
//!                       │ (registry) │            │  (writer)   │
//!                       └────────────┘            └─────────────┘
//! ```
//!
//! - [`Message`]: the JSON wire object exchanged with clients and peers
//! - [`Engine`]: configuration plus the send-side and receive-side handler
//!   chains that may rewrite, drop or absorb a message
//! - [`Presence`] / [`MessageBus`]: capability traits implemented by
//!   `lattice-cluster` (etcd and AMQP) and by in-memory fakes in tests
//! - [`ClusterContext`]: bundles the capabilities with the process shutdown
//!   token and is passed down explicitly, never held in globals

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;

pub use cluster::{Acknowledge, ClusterContext, Delivery, LeaseId, MessageBus, Presence};
pub use config::{EtcdConfig, GatewayConfig, JwtConfig, RabbitMqConfig};
pub use engine::{ChainHandler, Engine, bound, handler};
pub use error::{ClusterError, ClusterResult};
pub use message::Message;
