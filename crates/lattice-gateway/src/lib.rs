//! # Lattice Gateway
//!
//! The per-instance half of the Lattice routing plane: the HTTP entry point
//! that upgrades and authenticates sockets, the connection tasks that pump
//! frames, and the hub that dispatches messages between the local socket set
//! and the rest of the fleet.
//!
//! ## Lifecycle of a frame
//!
//! ```text
//! socket ──reader──▶ Hub::Send ──send chain──▶ presence lookup ──▶ publish
//!                                                    │
//!                                     (local ids resolved per instance)
//!
//! queue ──consumer──▶ Hub::Read ──receive chain──▶ write channel ──writer──▶ socket
//! ```
//!
//! The hub's loop is the only writer of the client table; connections reach
//! it through a [`HubHandle`]. Teardown flows one way: the hub removes the
//! record, the connection closes its socket.

pub mod auth;
pub mod connection;
pub mod hub;
pub mod server;

pub use auth::{AuthError, issue, validate};
pub use connection::{Connection, ConnectionState};
pub use hub::{Departure, Hub, HubHandle, Registration};
pub use server::{GatewayState, router, serve};
