//! Iteration timing for the batch progress bar.
//!
//! [`IterTimer`] tracks the duration of each batch step and keeps an
//! exponentially smoothed average (`ema ← α·dt + (1−α)·ema`, `α ∈ (0,1]`;
//! the first sample seeds the average). [`fmt_dur`] renders durations at a
//! human scale. Compiled only with the `progress` feature.

use std::time::{Duration, Instant};

pub struct IterTimer {
    previous: Instant,
    smoothed_ns: f64,
    alpha: f64,
    started: bool,
}

impl IterTimer {
    pub fn new(alpha: f64) -> Self {
        Self {
            previous: Instant::now(),
            smoothed_ns: 0.0,
            alpha,
            started: false,
        }
    }

    /// Record one iteration boundary; returns `(last, smoothed)` durations.
    pub fn tick(&mut self) -> (Duration, Duration) {
        let now = Instant::now();
        let last = now.duration_since(self.previous);
        self.previous = now;

        let last_ns = last.as_nanos() as f64;
        self.smoothed_ns = if self.started {
            self.alpha * last_ns + (1.0 - self.alpha) * self.smoothed_ns
        } else {
            self.started = true;
            last_ns
        };

        (last, Duration::from_nanos(self.smoothed_ns as u64))
    }
}

/// Render a duration as `"253µs"`, `"42ms"`, or `"3.14s"` depending on scale.
pub fn fmt_dur(d: Duration) -> String {
    match d.as_micros() {
        us @ 0..=999 => format!("{us}µs"),
        us @ 1_000..=999_999 => format!("{}ms", us / 1_000),
        _ => format!("{:.2}s", d.as_secs_f32()),
    }
}
