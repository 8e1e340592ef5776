//! Mock-time allocation.
//!
//! Every block a session mines is stamped with a synthetic timestamp taken
//! from a single [`TimestampAllocator`]. Starting from a fixed epoch and
//! advancing by the target block spacing makes the chain's timestamps
//! independent of wall-clock time.

use chrono::DateTime;

/// Bitcoin's target block spacing in seconds.
pub const BLOCK_INTERVAL: u64 = 600;

/// 2018-09-01T00:00:00Z, the epoch shared chains start from.
pub const DEFAULT_EPOCH: u64 = 1_535_760_000;

/// Latest accepted epoch. Node mock-time is a signed 64-bit value; this
/// leaves room for a million blocks above the epoch.
pub const MAX_EPOCH: u64 = i64::MAX as u64 - BLOCK_INTERVAL * 1_000_000;

/// The next timestamp would not fit the node's signed mock-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Mock clock exhausted at {current}")]
pub struct ClockOverflow {
    pub current: u64,
}

/// Monotonic mock clock shared by all generators of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampAllocator {
    current: u64,
}

impl TimestampAllocator {
    pub fn new(epoch: u64) -> Self {
        TimestampAllocator { current: epoch }
    }

    /// Advance by one block interval and return the new timestamp.
    ///
    /// Fails instead of wrapping, so a handed-out value is never reused.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<u64, ClockOverflow> {
        let next = self
            .current
            .checked_add(BLOCK_INTERVAL)
            .filter(|t| *t <= i64::MAX as u64)
            .ok_or(ClockOverflow {
                current: self.current,
            })?;
        self.current = next;
        Ok(next)
    }

    /// The last value handed out (or the epoch if `next` was never called).
    pub fn current(&self) -> u64 {
        self.current
    }

    /// RFC 3339 rendering of the cursor, for log lines.
    pub fn describe(&self) -> String {
        i64::try_from(self.current)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.current.to_string())
    }
}

impl Default for TimestampAllocator {
    fn default() -> Self {
        TimestampAllocator::new(DEFAULT_EPOCH)
    }
}
