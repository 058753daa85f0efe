//! Wall-clock budget shared by every attempt made within one iteration.

use std::time::{Duration, Instant};

/// A fixed point in time after which an iteration must stop spending effort.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            at: now.checked_add(budget).unwrap_or(now),
        }
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.at
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether waiting for `pause` would still leave time for more work.
    pub fn allows_pause(&self, pause: Duration) -> bool {
        self.remaining() > pause
    }
}
