// crates/swiftclip-core/src/lib.rs
//
// Pure data shared by swiftclip-media and swiftclip-cli: job model, errors,
// events, configuration and the numeric helpers behind progress and motion.
// No ffmpeg, no GPU.

pub mod commands;
pub mod config;
pub mod error;
pub mod helpers;
pub mod job;
pub mod media_types;
pub mod motion;
pub mod progress;

pub use commands::EngineCommand;
pub use config::EngineConfig;
pub use error::{ErrorKind, ExportError, Result};
pub use job::{CropRect, ExportBatch, ExportJob, Strategy};
pub use media_types::{EngineEvent, WorkerEvent};
