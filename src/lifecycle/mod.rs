//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     dispose_now → trigger → accept loop stops → drain → release listener
//!
//! Deadlines (deadline.rs):
//!     timeout → checked_deadline → Instant (or Error::Arithmetic, no I/O)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful dispose in the server binary
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Drain is bounded: forced close after the deadline

pub mod deadline;
pub mod shutdown;
pub mod signals;

pub use deadline::checked_deadline;
pub use shutdown::{Shutdown, ShutdownListener};
