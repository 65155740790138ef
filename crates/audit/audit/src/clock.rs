use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of strictly increasing `created_at` timestamps.
///
/// Each call returns `max(now, previous + 1µs)`, so records written by one
/// process are ordered by insertion even when the wall clock stalls or steps
/// backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    /// Create a clock with no prior timestamps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let prev = self
            .last_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        let next = wall.max(prev.saturating_add(1));
        DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn tracks_wall_clock() {
        let clock = MonotonicClock::new();
        let ts = clock.now();
        let drift = (Utc::now() - ts).num_seconds().abs();
        assert!(drift < 5);
    }
}
