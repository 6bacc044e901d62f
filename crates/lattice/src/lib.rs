//! # Lattice
//!
//! A horizontally scalable WebSocket gateway. Clients connect to any
//! instance; messages addressed to logical client ids are routed across the
//! fleet to whichever instance holds each recipient's socket.
//!
//! ## Architecture
//!
//! ```text
//!  client ──ws──▶ ┌──────────┐   presence    ┌──────────┐ ◀──ws── client
//!                 │ instance │◀─────────────▶│ instance │
//!                 │  (hub)   │     etcd      │  (hub)   │
//!                 └────┬─────┘               └────▲─────┘
//!                      │        RabbitMQ         │
//!                      └───────▶ queue ──────────┘
//!                           (one per instance)
//! ```
//!
//! - Each live client id is bound to its instance's address in etcd under a
//!   TTL lease, renewed while the socket lives.
//! - Each instance consumes a durable work queue named by its own address;
//!   sending to a client means publishing to the queue of the instance its
//!   presence entry points at.
//! - Send-side and receive-side handler chains may rewrite, drop or absorb
//!   messages on the way through.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use lattice::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     LoggingBuilder::new().init();
//!     let config = load_config_from_file("etc/webSocketService.yaml")?;
//!     let runtime = GatewayRuntime::init_with(config, |engine| {
//!         engine.set_send_chain(vec![handler(|_, _, msg| {
//!             // rewrite, drop (None) or absorb here
//!             Some(msg)
//!         })]);
//!     })
//!     .await?;
//!     runtime.run().await
//! }
//! ```

pub use lattice_cluster::{AmqpBus, EtcdPresence};
pub use lattice_core::{
    ChainHandler, ClusterContext, ClusterError, ClusterResult, Engine, GatewayConfig, Message,
    MessageBus, Presence, bound, handler,
};
pub use lattice_gateway::{AuthError, ConnectionState, Hub, HubHandle, issue, validate};
pub use lattice_runtime::{
    ConfigError, GatewayRuntime, LoggingBuilder, RuntimeError, RuntimeResult,
    load_config_from_file,
};

/// Prelude for gateway binaries.
pub mod prelude {
    pub use lattice_core::{Engine, GatewayConfig, Message, bound, handler};
    pub use lattice_runtime::{GatewayRuntime, LoggingBuilder, load_config_from_file};
    pub use lattice_runtime::tracing::{debug, error, info, warn};
}
