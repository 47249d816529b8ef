//! Reading where the arm is.
//!
//! Right after a (re)connect the CAN link reports all-zero feedback for a
//! short while. [`PoseReader::current_pose`] papers over that window with a
//! short retry loop and never fails on it: once the deadline passes it hands
//! back whatever it last read, all zeros included, and callers must treat an
//! all-zero [`Pose`] as suspect.

use crate::arm::{ArmError, ArmHandle};
use crate::pose::Pose;

use log::warn;
use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

/// Gap between retries of an all-zero read.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// How long to keep retrying before giving up on a non-zero read.
pub const READ_DEADLINE: Duration = Duration::from_millis(100);

/// Lets a warning through at most once per interval.
#[derive(Debug)]
pub struct WarnLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl WarnLimiter {
    /// A limiter allowing one warning per `interval`.
    pub fn new(interval: Duration) -> Self {
        WarnLimiter {
            interval,
            last: Mutex::new(None),
        }
    }

    /// True if a warning may be emitted now; claims the slot if so.
    pub fn ready(&self) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return true;
        };
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Retrying pose accessor for one arm.
#[derive(Debug)]
pub struct PoseReader {
    arm: ArmHandle,
    retry: Duration,
    deadline: Duration,
    limiter: WarnLimiter,
}

impl PoseReader {
    /// A reader with the standard 5 ms retry and 100 ms deadline.
    pub fn new(arm: ArmHandle) -> Self {
        Self::with_timing(arm, RETRY_INTERVAL, READ_DEADLINE)
    }

    /// A reader with custom timing. Warnings are limited to one per deadline.
    pub fn with_timing(arm: ArmHandle, retry: Duration, deadline: Duration) -> Self {
        PoseReader {
            arm,
            retry,
            deadline,
            limiter: WarnLimiter::new(deadline),
        }
    }

    /// The handle this reader polls.
    pub fn arm(&self) -> &ArmHandle {
        &self.arm
    }

    /// The first non-zero pose read within the deadline, or the last read if
    /// none was. Only bus errors are returned as errors.
    pub fn current_pose(&self) -> Result<Pose, ArmError> {
        let started = Instant::now();
        loop {
            let pose = self.arm.read_pose()?;
            if !pose.is_all_zero() {
                return Ok(pose);
            }
            if started.elapsed() >= self.deadline {
                if self.limiter.ready() {
                    warn!(
                        "arm keeps reporting an all-zero pose after {:?}; check the CAN link",
                        self.deadline
                    );
                }
                return Ok(pose);
            }
            thread::sleep(self.retry);
        }
    }
}
