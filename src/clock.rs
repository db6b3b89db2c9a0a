use std::time::Instant;

/// Millisecond clock for display update stamps.
///
/// Readings start at 1 so that 0 can keep meaning "never updated".
#[derive(Debug, Clone, Copy)]
pub(crate) struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }
}

/// Next stamp for a slot: the current time, bumped past `previous` when several updates land in
/// the same millisecond.
pub(crate) fn next_stamp(previous: u64, now: u64) -> u64 {
    now.max(previous + 1)
}
