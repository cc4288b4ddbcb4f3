// crates/swiftclip-media/src/lib.rs
//
// The export engine. Talks to swiftclip-cli (or any embedder) through the
// ExportWorker channels or Engine::run_batch directly.
//
// Layering, bottom up:
//   platform / surface     codec, container and GPU seams + frame hand-off
//   decoder / encoder      state-machine wrappers over the codec seams
//   gpu                    context manager, quad renderer, frame analyzer
//   pool / clock           encoder reuse and render pacing
//   graph / remux          the two per-job paths
//   engine / worker        batch dispatch and the export thread
//   desktop                ffmpeg + wgpu implementation of MediaPlatform
//
// To add a platform backend, implement MediaPlatform in a new module and
// hand it to Engine::new / ExportWorker::new.

pub mod clock;
pub mod decoder;
pub mod desktop;
pub mod encoder;
pub mod engine;
pub mod gpu;
pub mod graph;
pub(crate) mod helpers;
pub mod platform;
pub mod pool;
pub mod remux;
pub mod surface;
pub mod worker;

#[cfg(test)]
mod testkit;

pub use desktop::DesktopPlatform;
pub use engine::Engine;
pub use platform::MediaPlatform;
pub use pool::EncoderPool;
pub use worker::ExportWorker;

pub use swiftclip_core::media_types::{EngineEvent, WorkerEvent};
