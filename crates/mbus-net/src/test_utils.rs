//! Test utilities for the network layer.
//!
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use mbus_net::test_utils::ManualTimeSource;
//! use mbus_net::TimeSource;
//!
//! let time = ManualTimeSource::new(1_000);
//! time.advance(500);
//! assert_eq!(time.now().as_millis(), 1_500);
//! ```

use crate::ports::TimeSource;
use mbus_types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// A time source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    /// Create a clock reading `millis`.
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_source() {
        let time = ManualTimeSource::new(10);
        assert_eq!(time.now().as_millis(), 10);
        time.advance(5);
        assert_eq!(time.now().as_millis(), 15);
        time.set(1);
        assert_eq!(time.now().as_millis(), 1);
    }
}
