// crates/swiftclip-core/src/config.rs
//
// Engine configuration, loaded from TOML.
//
// Every field has a default, so an empty file (or no file) yields the stock
// pipeline: 5 Mbps / 30 fps / 1 s GOP encoder, pool cap 2, 32×32 analyzer,
// ~1 s bounded frame wait in 10 ms polls, 100 ms progress interval.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::motion::MotionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub encoder:  EncoderConfig,
    #[serde(default)]
    pub decoder:  DecoderConfig,
    #[serde(default)]
    pub pool:     PoolConfig,
    #[serde(default)]
    pub render:   RenderConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Hardware H.264 encoders, tried in order.
    pub candidates:             Vec<String>,
    pub bitrate:                u32,
    pub frame_rate:             u32,
    pub keyframe_interval_secs: u32,
    /// Apply vendor low-latency options where the encoder knows them.
    pub low_latency:            bool,
    /// Bounded wait per encoder output poll.
    pub drain_timeout_ms:       u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            candidates: [
                "h264_nvenc",
                "h264_qsv",
                "h264_videotoolbox",
                "h264_amf",
                "h264_mf",
                "h264_v4l2m2m",
                "h264_mediacodec",
            ]
            .map(String::from)
            .to_vec(),
            bitrate:                5_000_000,
            frame_rate:             30,
            keyframe_interval_secs: 1,
            low_latency:            true,
            drain_timeout_ms:       1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Hardware decoder name templates; `{codec}` is replaced with the source
    /// codec name (`h264`, `hevc`, …).
    pub candidates:        Vec<String>,
    /// Hand a GPU-path decoder to the next GPU job instead of re-opening the source.
    pub reuse_across_jobs: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            candidates: ["{codec}_cuvid", "{codec}_qsv", "{codec}_v4l2m2m", "{codec}_mediacodec"]
                .map(String::from)
                .to_vec(),
            reuse_across_jobs: true,
        }
    }
}

impl DecoderConfig {
    /// Candidate decoder names for a concrete source codec.
    pub fn candidates_for(&self, codec: &str) -> Vec<String> {
        self.candidates.iter().map(|t| t.replace("{codec}", codec)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_idle_per_resolution: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle_per_resolution: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub frame_wait_timeout_ms:       u64,
    pub frame_wait_poll_ms:          u64,
    pub progress_interval_ms:        u64,
    /// Back-off when a loop iteration found no work.
    pub idle_yield_us:               u64,
    pub max_consecutive_step_errors: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_wait_timeout_ms:       1_000,
            frame_wait_poll_ms:          10,
            progress_interval_ms:        100,
            idle_yield_us:               500,
            max_consecutive_step_errors: 64,
        }
    }
}

impl RenderConfig {
    pub fn frame_wait_timeout(&self) -> Duration { Duration::from_millis(self.frame_wait_timeout_ms) }
    pub fn frame_wait_poll(&self)    -> Duration { Duration::from_millis(self.frame_wait_poll_ms.max(1)) }
    pub fn progress_interval(&self)  -> Duration { Duration::from_millis(self.progress_interval_ms) }
    pub fn idle_yield(&self)         -> Duration { Duration::from_micros(self.idle_yield_us) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub sample_size:     u32,
    pub keep_threshold:  f32,
    pub low_motion:      f32,
    pub high_motion:     f32,
    pub keyframe_motion: f32,
    pub low_bitrate:     u32,
    pub high_bitrate:    u32,
    /// A gap this large between consecutive decoded frames counts as a scene cut.
    pub scene_gap_ms:    u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let p = MotionPolicy::default();
        Self {
            sample_size:     32,
            keep_threshold:  p.keep_threshold,
            low_motion:      p.low_motion,
            high_motion:     p.high_motion,
            keyframe_motion: p.keyframe_motion,
            low_bitrate:     p.low_bitrate,
            high_bitrate:    p.high_bitrate,
            scene_gap_ms:    500,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s).map_err(|e| ExportError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| ExportError::Config(format!("{}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ExportError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(ExportError::Config(msg.to_string()));
        if self.encoder.candidates.is_empty() {
            return bad("encoder.candidates is empty");
        }
        if self.decoder.candidates.is_empty() {
            return bad("decoder.candidates is empty");
        }
        if self.encoder.frame_rate == 0 {
            return bad("encoder.frame_rate must be positive");
        }
        if self.encoder.bitrate == 0 {
            return bad("encoder.bitrate must be positive");
        }
        if self.analyzer.sample_size == 0 {
            return bad("analyzer.sample_size must be positive");
        }
        if self.analyzer.high_motion <= self.analyzer.low_motion {
            return bad("analyzer.high_motion must exceed analyzer.low_motion");
        }
        Ok(())
    }

    /// Motion thresholds with the encoder's configured bitrate as the middle band.
    pub fn motion_policy(&self) -> MotionPolicy {
        MotionPolicy {
            keep_threshold:  self.analyzer.keep_threshold,
            low_motion:      self.analyzer.low_motion,
            high_motion:     self.analyzer.high_motion,
            keyframe_motion: self.analyzer.keyframe_motion,
            low_bitrate:     self.analyzer.low_bitrate,
            default_bitrate: self.encoder.bitrate,
            high_bitrate:    self.analyzer.high_bitrate,
        }
    }
}
