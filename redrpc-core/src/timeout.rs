//! Deadline arithmetic for bounded blocking waits.
//!
//! Every blocking broker call is bounded by the poll quantum, so loops can
//! observe shutdown and deadlines at a predictable rate. Brokers honour
//! timeouts only in multiples of their granularity, hence the rounding.

use std::time::{Duration, Instant};

/// An absolute point in time after which a wait gives up.
///
/// A timeout too large to represent as an [`Instant`] never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// Time left, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let Some(at) = self.at else {
            return Some(Duration::MAX);
        };
        let left = at.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// The deadline, or `None` when it lies beyond what `Instant` can hold.
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }
}

/// Round `d` up to the next multiple of `granularity`.
///
/// A zero granularity leaves `d` unchanged.
pub fn round_up(d: Duration, granularity: Duration) -> Duration {
    let unit = granularity.as_nanos();
    if unit == 0 {
        return d;
    }
    let units = d.as_nanos().div_ceil(unit);
    let nanos = units.saturating_mul(unit);
    // u128 -> u64 nanos covers ~584 years; clamp anything beyond
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Length of the next blocking wait.
///
/// The wait never exceeds one quantum, never exceeds what is left (before
/// rounding) and is never zero while time remains: a zero timeout means
/// "block forever" to most brokers.
pub fn poll_window(remaining: Duration, quantum: Duration, granularity: Duration) -> Duration {
    let window = round_up(remaining.min(quantum), granularity);
    if window.is_zero() {
        granularity.max(Duration::from_millis(1))
    } else {
        window
    }
}
