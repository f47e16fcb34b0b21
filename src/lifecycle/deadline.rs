//! Timeout → deadline conversion.
//!
//! Timeouts are validated before any I/O starts. A timeout whose nanosecond
//! count does not fit a signed 64-bit counter, or which would push the
//! monotonic clock past its range, is rejected with `Error::Arithmetic`.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Largest timeout accepted anywhere in the runtime.
pub const MAX_TIMEOUT: Duration = Duration::from_nanos(i64::MAX as u64);

/// Validate `timeout` and turn it into an absolute deadline.
pub fn checked_deadline(timeout: Duration) -> Result<Instant> {
    if timeout > MAX_TIMEOUT {
        return Err(Error::Arithmetic(timeout));
    }
    Instant::now()
        .checked_add(timeout)
        .ok_or(Error::Arithmetic(timeout))
}
