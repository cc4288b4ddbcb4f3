// crates/swiftclip-core/src/helpers/time.rs
//
// Timestamp helpers shared by the stream copier and the render graph.
//
// All engine-internal timestamps are signed microseconds (µs), the unit the
// platform codecs report. Job descriptors carry milliseconds; conversion
// happens once when a job is turned into a `TrimWindow`.

pub const US_PER_MS:  i64 = 1_000;
pub const US_PER_SEC: i64 = 1_000_000;

pub fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(US_PER_MS)
}

pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / US_PER_SEC as f64
}

/// The slice of the source a job keeps, in source µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    pub start_us: i64,
    /// `None` = to the end of the source.
    pub end_us:   Option<i64>,
}

impl TrimWindow {
    pub const FULL: TrimWindow = TrimWindow { start_us: 0, end_us: None };

    /// Build from job milliseconds. A negative duration means "to end"; zero is
    /// a degenerate (but valid) window that still yields one frame.
    pub fn from_ms(start_ms: i64, duration_ms: i64) -> Self {
        let start_us = ms_to_us(start_ms.max(0));
        let end_us = (duration_ms >= 0).then(|| start_us.saturating_add(ms_to_us(duration_ms)));
        Self { start_us, end_us }
    }

    /// True once `pts_us` is at or beyond the exclusive end of the window.
    pub fn is_past_end(&self, pts_us: i64) -> bool {
        matches!(self.end_us, Some(end) if pts_us >= end)
    }

    /// Length of the window, clipped to the source duration when known.
    ///
    /// ```
    /// use swiftclip_core::helpers::time::TrimWindow;
    /// let w = TrimWindow::from_ms(2_000, -1);
    /// assert_eq!(w.effective_duration_us(Some(10_000_000)), Some(8_000_000));
    /// let w = TrimWindow::from_ms(0, 5_000);
    /// assert_eq!(w.effective_duration_us(Some(10_000_000)), Some(5_000_000));
    /// assert_eq!(w.effective_duration_us(None), Some(5_000_000));
    /// ```
    pub fn effective_duration_us(&self, source_duration_us: Option<i64>) -> Option<i64> {
        let end = match (self.end_us, source_duration_us) {
            (Some(end), Some(src)) => end.min(src),
            (Some(end), None)      => end,
            (None, Some(src))      => src,
            (None, None)           => return None,
        };
        Some((end - self.start_us).max(0))
    }

    /// Source timestamp re-based so the window starts at zero, never negative.
    pub fn rebase(&self, pts_us: i64) -> i64 {
        (pts_us - self.start_us).max(0)
    }

    /// Fraction of the window covered once `pts_us` has been reached.
    pub fn fraction(&self, pts_us: i64, source_duration_us: Option<i64>) -> f32 {
        match self.effective_duration_us(source_duration_us) {
            Some(total) if total > 0 => (self.rebase(pts_us) as f64 / total as f64).clamp(0.0, 1.0) as f32,
            _ => 0.0,
        }
    }
}

impl Default for TrimWindow {
    fn default() -> Self { Self::FULL }
}

/// Format µs as a compact human-readable string for log lines.
///
/// ```
/// use swiftclip_core::helpers::time::format_duration_us;
/// assert_eq!(format_duration_us(4_200_000),     "4.2s");
/// assert_eq!(format_duration_us(187_000_000),   "3:07");
/// assert_eq!(format_duration_us(3_875_000_000), "1:04:35");
/// ```
pub fn format_duration_us(us: i64) -> String {
    let secs = us_to_secs(us.max(0));
    if secs >= 3600.0 {
        format!(
            "{}:{:02}:{:02}",
            secs as u64 / 3600,
            (secs as u64 % 3600) / 60,
            secs as u64 % 60,
        )
    } else if secs >= 60.0 {
        format!("{}:{:02}", secs as u64 / 60, secs as u64 % 60)
    } else {
        format!("{secs:.1}s")
    }
}
