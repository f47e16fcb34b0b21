//! Error taxonomy for the runtime.
//!
//! # Propagation
//! - `Configuration` surfaces synchronously to whoever misconfigured; never retried
//! - `Bind` / `Timeout` / `Arithmetic` come out of the blocking operations
//! - `Handshake` only ever terminates the affected connection

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The listening resource could not be acquired.
    #[error("failed to bind {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A blocking operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// A timeout value does not fit the deadline clock.
    #[error("timeout {0:?} overflows the deadline clock")]
    Arithmetic(Duration),

    /// SNI resolution or certificate installation failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Transport failure outside of bind.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Returns true for errors raised before any I/O took place.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Arithmetic(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
