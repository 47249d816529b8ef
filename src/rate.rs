//! Fixed-rate loop pacing.

use std::time::{Duration, Instant};

/// Sleeps out the remainder of each control period.
///
/// Deadlines advance by exactly one period per tick, so small overruns are
/// absorbed. If the loop falls more than a whole period behind, the schedule
/// restarts from now instead of bursting to catch up.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// A ticker with the given period, first deadline one period from now.
    pub fn new(period: Duration) -> Self {
        Ticker {
            period,
            next: Instant::now() + period,
        }
    }

    /// A ticker running at `hz` iterations per second.
    pub fn from_hz(hz: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / hz.max(f64::MIN_POSITIVE)))
    }

    /// The control period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the next deadline.
    pub fn tick(&mut self) {
        let now = Instant::now();
        if self.next > now {
            spin_sleep::sleep(self.next - now);
            self.next += self.period;
        } else if now - self.next > self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
    }
}

/// Sleep for `total`, checking `interrupted` every `slice`. Returns true if
/// the wait was cut short.
pub fn sleep_interruptible<F>(total: Duration, slice: Duration, mut interrupted: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + total;
    loop {
        if interrupted() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        spin_sleep::sleep(slice.min(deadline - now));
    }
}
