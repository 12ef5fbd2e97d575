//! Wall-clock timing for tasks
//!
//! Timestamps are unix seconds as `f64`, which is what the result documents
//! store in `start_time`.

use chrono::Utc;

/// Current time as unix seconds
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stopwatch {
    start_time: f64,
}

impl Stopwatch {
    /// Start measuring now
    pub fn start() -> Self {
        Self {
            start_time: now_timestamp(),
        }
    }

    /// Resume a stopwatch from a recorded start time
    pub fn from_start_time(start_time: f64) -> Self {
        Self { start_time }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Seconds elapsed since start, never negative
    pub fn duration(&self) -> f64 {
        (now_timestamp() - self.start_time).max(0.0)
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}
