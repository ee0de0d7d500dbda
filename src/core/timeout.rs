/*!
 * Operation Timeouts
 *
 * Deadlines are given as `(duration, unit)` relative to issue time.
 * A non-positive duration means "no deadline".
 *
 * ## Example
 *
 * ```
 * use aio_groups::{Timeout, TimeUnit};
 * use std::time::Duration;
 *
 * let t = Timeout::new(200, TimeUnit::Milliseconds);
 * assert_eq!(t.duration(), Some(Duration::from_millis(200)));
 * assert_eq!(Timeout::new(0, TimeUnit::Seconds).duration(), None);
 * ```
 */

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Unit for operation deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Convert a non-negative amount of this unit into a `Duration`
    pub const fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
        }
    }
}

/// Optional deadline for a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    amount: i64,
    unit: TimeUnit,
}

impl Timeout {
    /// No deadline
    pub const NONE: Timeout = Timeout {
        amount: 0,
        unit: TimeUnit::Milliseconds,
    };

    pub const fn new(amount: i64, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn millis(amount: i64) -> Self {
        Self::new(amount, TimeUnit::Milliseconds)
    }

    pub const fn secs(amount: i64) -> Self {
        Self::new(amount, TimeUnit::Seconds)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Duration of the deadline, `None` when there is none
    pub fn duration(&self) -> Option<Duration> {
        if self.amount <= 0 {
            None
        } else {
            Some(self.unit.to_duration(self.amount as u64))
        }
    }

    /// Absolute deadline for an operation issued at `issued`
    ///
    /// A deadline too far away to represent is treated as no deadline.
    pub fn deadline_from(&self, issued: Instant) -> Option<Instant> {
        self.duration().and_then(|d| issued.checked_add(d))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        Self::new(nanos, TimeUnit::Nanoseconds)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map(Timeout::from).unwrap_or(Timeout::NONE)
    }
}

/// Time left until `deadline`, rounded up to whole milliseconds
///
/// Backends sleep in milliseconds; rounding up keeps them from waking
/// before the deadline.
pub(crate) fn wait_millis(deadline: Option<Instant>, now: Instant) -> i32 {
    match deadline {
        None => -1,
        Some(deadline) => {
            let left = deadline.saturating_duration_since(now);
            let mut ms = left.as_millis();
            if left.as_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}
