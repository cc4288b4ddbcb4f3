// crates/swiftclip-core/src/motion.rs
//
// Perceptual motion metric and the encoding decisions derived from it.
//
// The GPU side (FrameAnalyzer in swiftclip-media) only produces two small
// RGBA readbacks; everything numeric lives here so it can be tested without a
// device.

/// Largest possible per-pixel difference: |ΔR| + |ΔG| + |ΔB| with 8-bit channels.
const MAX_PIXEL_DIFF: f64 = 255.0 * 3.0;

/// Normalised mean absolute RGB difference between two RGBA buffers.
///
/// Alpha is ignored. Buffers of different length are compared over their
/// common prefix; an empty comparison scores 0.
///
/// ```
/// use swiftclip_core::motion::motion_score;
/// let black = [0u8, 0, 0, 255].repeat(4);
/// let white = [255u8, 255, 255, 255].repeat(4);
/// assert_eq!(motion_score(&black, &black), 0.0);
/// assert_eq!(motion_score(&black, &white), 1.0);
/// ```
pub fn motion_score(previous: &[u8], current: &[u8]) -> f32 {
    let pixels = previous.len().min(current.len()) / 4;
    if pixels == 0 {
        return 0.0;
    }
    let diff: u64 = previous
        .chunks_exact(4)
        .zip(current.chunks_exact(4))
        .map(|(a, b)| {
            (0..3).map(|c| u64::from(a[c].abs_diff(b[c]))).sum::<u64>()
        })
        .sum();
    (diff as f64 / (MAX_PIXEL_DIFF * pixels as f64)) as f32
}

/// Thresholds and bitrate bands, mirrored from `AnalyzerConfig`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionPolicy {
    pub keep_threshold:  f32,
    pub low_motion:      f32,
    pub high_motion:     f32,
    pub keyframe_motion: f32,
    pub low_bitrate:     u32,
    pub default_bitrate: u32,
    pub high_bitrate:    u32,
}

impl Default for MotionPolicy {
    fn default() -> Self {
        Self {
            keep_threshold:  0.01,
            low_motion:      0.05,
            high_motion:     0.3,
            keyframe_motion: 0.5,
            low_bitrate:     2_000_000,
            default_bitrate: 5_000_000,
            high_bitrate:    8_000_000,
        }
    }
}

/// What the render loop does with one analysed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub bitrate:        u32,
    pub force_keyframe: bool,
}

impl MotionPolicy {
    pub fn keeps(&self, score: f32) -> bool {
        score > self.keep_threshold
    }

    /// Bitrate band + keyframe request for a kept frame.
    pub fn decide(&self, score: f32) -> RateDecision {
        let bitrate = if score < self.low_motion {
            self.low_bitrate
        } else if score > self.high_motion {
            self.high_bitrate
        } else {
            self.default_bitrate
        };
        RateDecision { bitrate, force_keyframe: score > self.keyframe_motion }
    }
}
