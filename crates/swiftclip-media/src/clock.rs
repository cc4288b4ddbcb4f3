// crates/swiftclip-media/src/clock.rs
//
// FrameClock: per-job counters for the summary line the render graph logs
// when a job finishes (frames decoded / kept / dropped, effective fps).

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FrameClock {
    started:  Instant,
    decoded:  u64,
    rendered: u64,
    dropped:  u64,
}

impl FrameClock {
    pub fn start() -> Self {
        Self { started: Instant::now(), decoded: 0, rendered: 0, dropped: 0 }
    }

    pub fn tick_decoded(&mut self) {
        self.decoded += 1;
    }

    pub fn tick_rendered(&mut self) {
        self.rendered += 1;
    }

    pub fn tick_dropped(&mut self) {
        self.dropped += 1;
    }

    pub fn decoded(&self) -> u64 { self.decoded }
    pub fn rendered(&self) -> u64 { self.rendered }
    pub fn dropped(&self) -> u64 { self.dropped }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Rendered frames per wall-clock second.
    pub fn fps(&self) -> f64 {
        fps_over(self.rendered, self.elapsed())
    }
}

fn fps_over(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON { 0.0 } else { frames as f64 / secs }
}
