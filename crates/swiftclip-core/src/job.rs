// crates/swiftclip-core/src/job.rs
//
// Export job model and the batch-request parser.
//
// Design:
//   • `ExportJob`:   one requested output. Immutable once built.
//   • `ExportBatch`: ordered jobs sharing one source file.
//   • `ExportBatch::from_request()`: parses the loosely-typed map that the
//     command bridge hands over. Numbers may arrive as JSON ints, floats or
//     numeric strings; every numeric field has a default. Only the source
//     path, the job list and each job's destination are required.
//
// Field names:
//   Canonical names (destinationPath, startTimeMs, …) and the short names the
//   mobile bridge historically sent (dest, startTime, duration, cropX, width,
//   audioPath …) are both accepted. The first key present wins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ExportError, Result};
use crate::helpers::time::TrimWindow;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const DEFAULT_TARGET_WIDTH:  u32 = 720;
pub const DEFAULT_TARGET_HEIGHT: u32 = 1280;

/// Largest frame edge accepted from a request.
const MAX_DIMENSION: u32 = 8192;

/// Tolerance for "crop is a no-op".
const CROP_NOOP_EPSILON: f32 = 0.01;

// ── Public types ──────────────────────────────────────────────────────────────

/// Normalised crop rectangle in texture space (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl CropRect {
    pub const FULL: CropRect = CropRect { x: 0.0, y: 0.0, w: 1.0, h: 1.0 };

    /// True when the rectangle keeps (almost) the whole frame.
    pub fn is_noop(&self) -> bool {
        self.w >= 1.0 - CROP_NOOP_EPSILON
            && self.h >= 1.0 - CROP_NOOP_EPSILON
            && self.x <= CROP_NOOP_EPSILON
            && self.y <= CROP_NOOP_EPSILON
    }

    fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if ![self.x, self.y, self.w, self.h].into_iter().all(in_unit) {
            return Err(ExportError::InvalidArguments(format!("crop out of [0,1]: {self:?}")));
        }
        if self.w <= 0.0 || self.h <= 0.0 {
            return Err(ExportError::InvalidArguments(format!("crop has no area: {self:?}")));
        }
        if self.x + self.w > 1.0 + 1e-3 || self.y + self.h > 1.0 + 1e-3 {
            return Err(ExportError::InvalidArguments(format!("crop exceeds frame: {self:?}")));
        }
        Ok(())
    }
}

impl Default for CropRect {
    fn default() -> Self { Self::FULL }
}

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Remux compressed samples, no decode or encode.
    StreamCopy,
    /// Decode → GPU transform → encode.
    GpuTransform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub destination_path:  PathBuf,
    pub start_time_ms:     i64,
    /// −1 = to the end of the source.
    pub duration_ms:       i64,
    pub crop_rect:         CropRect,
    pub target_width:      u32,
    pub target_height:     u32,
    /// Only influences strategy selection; audio is never mixed.
    pub has_audio_overlay: bool,
}

impl ExportJob {
    /// A full-length, uncropped job at the default size.
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination_path:  destination.into(),
            start_time_ms:     0,
            duration_ms:       -1,
            crop_rect:         CropRect::FULL,
            target_width:      DEFAULT_TARGET_WIDTH,
            target_height:     DEFAULT_TARGET_HEIGHT,
            has_audio_overlay: false,
        }
    }

    pub fn strategy(&self) -> Strategy {
        if self.crop_rect.is_noop() && !self.has_audio_overlay {
            Strategy::StreamCopy
        } else {
            Strategy::GpuTransform
        }
    }

    pub fn window(&self) -> TrimWindow {
        TrimWindow::from_ms(self.start_time_ms, self.duration_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination_path.as_os_str().is_empty() {
            return Err(ExportError::InvalidArguments("destinationPath is empty".into()));
        }
        if self.start_time_ms < 0 {
            return Err(ExportError::InvalidArguments(format!(
                "startTimeMs must not be negative (got {})", self.start_time_ms
            )));
        }
        for (name, v) in [("targetWidth", self.target_width), ("targetHeight", self.target_height)] {
            if !(2..=MAX_DIMENSION).contains(&v) {
                return Err(ExportError::InvalidArguments(format!("{name} out of range: {v}")));
            }
        }
        self.crop_rect.validate()
    }

    /// Parse one job from a loosely-typed map.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let destination = string_field(map, &["destinationPath", "dest"])?
            .ok_or_else(|| ExportError::InvalidArguments("job is missing destinationPath".into()))?;

        let mut job = ExportJob::new(destination);
        if let Some(v) = number_field(map, &["startTimeMs", "startTime"])? {
            job.start_time_ms = v.round() as i64;
        }
        if let Some(v) = number_field(map, &["durationMs", "duration"])? {
            job.duration_ms = v.round() as i64;
        }
        if let Some(v) = number_field(map, &["targetWidth", "width"])? {
            job.target_width = dimension(v, "targetWidth")?;
        }
        if let Some(v) = number_field(map, &["targetHeight", "height"])? {
            job.target_height = dimension(v, "targetHeight")?;
        }
        job.crop_rect = crop_field(map)?;
        job.has_audio_overlay = match map.get("hasAudioOverlay") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => string_field(map, &["audioPath"])?.is_some(),
            Some(other) => {
                return Err(ExportError::InvalidArguments(format!(
                    "hasAudioOverlay must be a boolean, got {other}"
                )))
            }
        };

        job.validate()?;
        Ok(job)
    }
}

/// Ordered jobs sharing one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBatch {
    pub source_path: PathBuf,
    pub jobs:        Vec<ExportJob>,
}

impl ExportBatch {
    pub fn new(source_path: impl Into<PathBuf>, jobs: Vec<ExportJob>) -> Self {
        Self { source_path: source_path.into(), jobs }
    }

    /// Whole-batch check. Runs before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(ExportError::InvalidArguments("sourcePath is empty".into()));
        }
        if self.jobs.is_empty() {
            return Err(ExportError::InvalidArguments("batch has no jobs".into()));
        }
        self.jobs.iter().try_for_each(ExportJob::validate)
    }

    /// Parse `{ sourcePath, jobs: [...] }` from the command bridge.
    pub fn from_request(request: &Value) -> Result<Self> {
        let map = request.as_object()
            .ok_or_else(|| ExportError::InvalidArguments("request must be an object".into()))?;

        let source = string_field(map, &["sourcePath", "source"])?
            .ok_or_else(|| ExportError::InvalidArguments("request is missing sourcePath".into()))?;

        let jobs = match map.get("jobs").or_else(|| map.get("configs")) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ExportError::InvalidArguments(format!("jobs must be an array, got {other}")))
            }
            None => return Err(ExportError::InvalidArguments("request is missing jobs".into())),
        };

        let jobs = jobs
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let obj = item.as_object().ok_or_else(|| {
                    ExportError::InvalidArguments(format!("job {i} must be an object"))
                })?;
                ExportJob::from_map(obj).map_err(|e| match e {
                    ExportError::InvalidArguments(msg) => {
                        ExportError::InvalidArguments(format!("job {i}: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let batch = Self::new(source, jobs);
        batch.validate()?;
        Ok(batch)
    }
}

// ── Loose-map field readers ───────────────────────────────────────────────────

fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<(&'a Value, String)> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::Null) | None => None,
        Some(v) => Some((v, (*k).to_string())),
    })
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Result<Option<String>> {
    match first(map, keys) {
        None => Ok(None),
        Some((Value::String(s), _)) if s.trim().is_empty() => Ok(None),
        Some((Value::String(s), _)) => Ok(Some(s.clone())),
        Some((other, key)) => Err(ExportError::InvalidArguments(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>> {
    let Some((value, key)) = first(map, keys) else { return Ok(None) };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(ExportError::InvalidArguments(format!("{key} is not a number: {value}"))),
    }
}

fn dimension(v: f64, name: &str) -> Result<u32> {
    if v < 0.0 || v > f64::from(u32::MAX) {
        return Err(ExportError::InvalidArguments(format!("{name} out of range: {v}")));
    }
    Ok(v.round() as u32)
}

/// Crop can arrive as `cropRect: {x,y,w,h}` or as flat `cropX/cropY/cropW/cropH`.
/// Missing components default to the full frame.
fn crop_field(map: &Map<String, Value>) -> Result<CropRect> {
    let mut crop = CropRect::FULL;
    let nested = match map.get("cropRect") {
        Some(Value::Object(obj)) => Some(obj),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(ExportError::InvalidArguments(format!("cropRect must be an object, got {other}")))
        }
    };

    let read = |nested_key: &str, flat_key: &str| -> Result<Option<f64>> {
        if let Some(obj) = nested {
            if let Some(v) = number_field(obj, &[nested_key])? {
                return Ok(Some(v));
            }
        }
        number_field(map, &[flat_key])
    };

    if let Some(v) = read("x", "cropX")? { crop.x = v as f32; }
    if let Some(v) = read("y", "cropY")? { crop.y = v as f32; }
    if let Some(v) = read("w", "cropW")? { crop.w = v as f32; }
    if let Some(v) = read("h", "cropH")? { crop.h = v as f32; }
    Ok(crop)
}
