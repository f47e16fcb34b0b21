//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection (TCP or filesystem socket)
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → group.rs (live set used for graceful shutdown)
//!     → optional pipeline stages (TLS, wiretap, user stages)
//!     → Hand off to the connection handler
//!
//! Connection States:
//!     Connected → Configured → Disconnecting → Disposed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The group holds weak references only; connections own themselves

pub mod address;
pub mod connection;
pub mod group;
pub mod listener;
pub mod pipeline;
pub mod wiretap;

pub use address::{AddressOptions, BindTarget, Endpoint};
pub use connection::{
    AsyncStream, BoxedStream, Connection, ConnectionId, ConnectionIdentity, ConnectionLifecycle,
    ConnectionObserver, ConnectionState, Observers,
};
pub use group::ConnectionGroup;
pub use listener::{ConnectionPermit, Listener, Transport};
pub use pipeline::{handler, ConnectionHook, Handler, Pipeline, StreamStage};
pub use wiretap::Wiretap;
