//! Monotonic time for bounded waits
//!
//! Card interactions retry with fixed iteration budgets inherited from the
//! wire protocol; on top of those, the long waits carry a wall-clock
//! deadline so elapsed real time no longer scales with the bus clock
//! configuration.

/// A monotonic clock. `now_us` must never go backwards; the epoch is
/// arbitrary.
pub trait Monotonic {
    /// Current time in microseconds.
    fn now_us(&self) -> u64;
}

/// A point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline_us: u64,
}

impl Timeout {
    /// A timeout expiring `us` microseconds from now.
    pub fn after<M: Monotonic>(clock: &M, us: u64) -> Self {
        Self {
            deadline_us: clock.now_us().wrapping_add(us),
        }
    }

    /// Whether the deadline has passed. Wraparound-safe.
    pub fn expired<M: Monotonic>(&self, clock: &M) -> bool {
        self.deadline_us.wrapping_sub(clock.now_us()) as i64 <= 0
    }
}
