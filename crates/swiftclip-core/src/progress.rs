// crates/swiftclip-core/src/progress.rs
//
// Progress arithmetic shared by the copier, the render graph and the engine.
//
// Two layers:
//   • `ProgressThrottle`: per job. Rate-limits emission (one event per
//     interval) and enforces non-decreasing values in [0,1].
//   • `BatchProgress`:    per batch. Maps a job-local fraction into that
//     job's slice of the whole batch: (index + fraction) / count.

use std::time::{Duration, Instant};

/// `(job_index + job_fraction) / job_count`, with the fraction clamped to [0,1].
///
/// ```
/// use swiftclip_core::progress::batch_progress;
/// assert_eq!(batch_progress(0, 0.5, 2), 0.25);
/// assert_eq!(batch_progress(1, 1.0, 2), 1.0);
/// ```
pub fn batch_progress(job_index: usize, job_fraction: f32, job_count: usize) -> f32 {
    if job_count == 0 {
        return 1.0;
    }
    let f = if job_fraction.is_nan() { 0.0 } else { job_fraction.clamp(0.0, 1.0) };
    ((job_index as f64 + f as f64) / job_count as f64).clamp(0.0, 1.0) as f32
}

// ── Per-job throttle ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ProgressThrottle {
    interval:  Duration,
    last_emit: Option<Instant>,
    last:      f32,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_emit: None, last: 0.0 }
    }

    /// Offer a new reading. Returns the value to report, or `None` when the
    /// interval has not elapsed since the last report.
    pub fn offer(&mut self, value: f32) -> Option<f32> {
        self.offer_at(value, Instant::now())
    }

    pub fn offer_at(&mut self, value: f32, now: Instant) -> Option<f32> {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.last = self.last.max(v);
        let due = match self.last_emit {
            None       => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
        };
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.last)
    }

    /// Completion is always reported, bypassing the rate limit.
    pub fn finish(&mut self) -> f32 {
        self.last = 1.0;
        self.last_emit = Some(Instant::now());
        1.0
    }

    pub fn last(&self) -> f32 {
        self.last
    }
}

// ── Per-batch scaling ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BatchProgress {
    count: usize,
    last:  f32,
}

impl BatchProgress {
    pub fn new(count: usize) -> Self {
        Self { count, last: 0.0 }
    }

    /// Batch-level value for `fraction` of job `index`; never below a value
    /// already reported.
    pub fn scale(&mut self, index: usize, fraction: f32) -> f32 {
        self.last = self.last.max(batch_progress(index, fraction, self.count));
        self.last
    }

    pub fn complete(&mut self) -> f32 {
        self.last = 1.0;
        1.0
    }
}
