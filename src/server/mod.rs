//! Server runtime.
//!
//! # Data Flow
//! ```text
//! TcpServer::bind_now
//!     → Listener::bind (host/port or filesystem socket)
//!     → accept loop (one task, stops on shutdown)
//!     → per connection task:
//!         Connected → SNI handshake (optional) → pipeline hooks
//!         → Configured → handler → Disconnecting → Disposed
//!
//! DisposableServer::dispose_now
//!     → stop accepting → wait for the group to empty (bounded)
//!     → force-close leftovers on timeout → release the listener
//! ```

mod accept;
pub mod builder;
pub mod handle;

pub use builder::{TcpServer, DEFAULT_MAX_CONNECTIONS};
pub use handle::DisposableServer;
