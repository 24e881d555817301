use crate::ports::TimeSource;
use mbus_types::Timestamp;

// ============================================================================
// SystemTimeSource - Production Time Source
// ============================================================================

/// Production time source using the system clock.
///
/// For tests, use `ManualTimeSource` (feature `test-utils`).
///
/// # Example
///
/// ```rust
/// use mbus_net::{SystemTimeSource, TimeSource};
///
/// let time_source = SystemTimeSource::new();
/// assert!(time_source.now().as_millis() > 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Create a new system time source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
