//! Absolute-deadline tick scheduling
//!
//! Tick `n` is due at `start + n * period`. Sleeping towards that deadline,
//! instead of sleeping one period after each tick, keeps drift below one
//! period no matter how long an individual tick took.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Pacer {
    start: Instant,
    period: Duration,
    ticks: u64,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    pub fn starting_at(start: Instant, period: Duration) -> Self {
        Self { start, period, ticks: 0 }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Absolute deadline of tick `n`
    pub fn deadline(&self, n: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(n as u128);
        self.start + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Time left until the next tick is due, zero if already late
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline(self.ticks + 1).saturating_duration_since(now)
    }

    /// Mark one tick done and block until the next deadline
    pub fn wait(&mut self) {
        let remaining = self.remaining(Instant::now());
        self.ticks += 1;
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_are_absolute() {
        let start = Instant::now();
        let pacer = Pacer::starting_at(start, Duration::from_millis(20));
        assert_eq!(pacer.deadline(0), start);
        assert_eq!(pacer.deadline(1), start + Duration::from_millis(20));
        assert_eq!(pacer.deadline(1500), start + Duration::from_secs(30));
    }

    #[test]
    fn test_late_tick_does_not_accumulate() {
        let start = Instant::now();
        let mut pacer = Pacer::starting_at(start, Duration::from_millis(20));
        pacer.ticks = 10;

        // A tick that ran 35 ms late owes nothing; the next one is still on the grid
        let late = start + Duration::from_millis(11 * 20 + 35);
        assert_eq!(pacer.remaining(late), Duration::ZERO);
        pacer.ticks = 11;
        let early = start + Duration::from_millis(11 * 20 + 5);
        assert_eq!(pacer.remaining(early), Duration::from_millis(15));
    }

    #[test]
    fn test_elapsed_time_tracks_tick_count() {
        let period = Duration::from_millis(20);
        let ticks = 25u32;
        let started = Instant::now();
        let mut pacer = Pacer::starting_at(started, period);
        for _ in 0..ticks {
            // Simulated jitter that must not add up
            std::thread::sleep(Duration::from_millis(3));
            pacer.wait();
        }
        let elapsed = started.elapsed();
        // Within one period of the ideal schedule
        assert!(elapsed >= period * ticks, "elapsed {:?}", elapsed);
        assert!(elapsed <= period * (ticks + 1), "elapsed {:?}", elapsed);
    }
}
