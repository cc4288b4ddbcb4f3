// crates/swiftclip-core/src/media_types.rs
//
// Types that flow across the channel between swiftclip-media's worker thread
// and whoever submitted the batch. Plain data only: no ffmpeg, no GPU.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, ExportError};

/// Wire form of the event stream: `{"event":"progress","value":0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EngineEvent {
    Progress { value: f32 },
    Done     { path: PathBuf },
    Error    { code: ErrorKind, message: String },
}

impl EngineEvent {
    pub fn failure(err: &ExportError) -> Self {
        EngineEvent::Error { code: err.kind(), message: err.to_string() }
    }
}

/// Results sent from the ExportWorker thread to the submitter.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress { batch_id: Uuid, value: f32 },
    Done     { batch_id: Uuid, path: PathBuf },
    Failed   { batch_id: Uuid, kind: ErrorKind, msg: String },
}

impl WorkerEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            WorkerEvent::Progress { batch_id, .. }
            | WorkerEvent::Done { batch_id, .. }
            | WorkerEvent::Failed { batch_id, .. } => *batch_id,
        }
    }

    /// Strip the batch id for the wire.
    pub fn to_engine_event(&self) -> EngineEvent {
        match self {
            WorkerEvent::Progress { value, .. } => EngineEvent::Progress { value: *value },
            WorkerEvent::Done { path, .. }      => EngineEvent::Done { path: path.clone() },
            WorkerEvent::Failed { kind, msg, .. } => {
                EngineEvent::Error { code: *kind, message: msg.clone() }
            }
        }
    }
}
