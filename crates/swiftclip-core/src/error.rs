// crates/swiftclip-core/src/error.rs
//
// Every failure the engine can surface to a caller.
//
// Classification:
//   • Fatal kinds (InvalidArguments, SourceUnreadable, GpuInit, CodecInit,
//     MuxerOrdering) abort the job and, through the Engine, the whole batch.
//   • `Step` is the only recoverable kind: a single platform call inside the
//     frame loop failed and the loop may retry on its next iteration.
//   • `Teardown` is constructed only so cleanup code can log it with the same
//     kind vocabulary. It is never returned across a public API.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("source unreadable '{}': {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("GPU initialisation failed: {0}")]
    GpuInit(String),

    #[error("codec initialisation failed: {0}")]
    CodecInit(String),

    #[error("muxer ordering violated: {0}")]
    MuxerOrdering(String),

    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error("{stage} failed: {reason}")]
    Step { stage: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Short machine-readable classification carried across the result boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[serde(rename = "INVALID_ARGS")]
    InvalidArguments,
    SourceUnreadable,
    GpuInitFailure,
    CodecInitFailure,
    MuxerOrderingError,
    TeardownError,
    ExportFailed,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidArguments   => "INVALID_ARGS",
            ErrorKind::SourceUnreadable   => "SOURCE_UNREADABLE",
            ErrorKind::GpuInitFailure     => "GPU_INIT_FAILURE",
            ErrorKind::CodecInitFailure   => "CODEC_INIT_FAILURE",
            ErrorKind::MuxerOrderingError => "MUXER_ORDERING_ERROR",
            ErrorKind::TeardownError      => "TEARDOWN_ERROR",
            ErrorKind::ExportFailed       => "EXPORT_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::InvalidArguments(_)      => ErrorKind::InvalidArguments,
            ExportError::Config(_)                => ErrorKind::InvalidArguments,
            ExportError::SourceUnreadable { .. }  => ErrorKind::SourceUnreadable,
            ExportError::GpuInit(_)               => ErrorKind::GpuInitFailure,
            ExportError::CodecInit(_)             => ErrorKind::CodecInitFailure,
            ExportError::MuxerOrdering(_)         => ErrorKind::MuxerOrderingError,
            ExportError::Teardown(_)              => ErrorKind::TeardownError,
            ExportError::Step { .. } | ExportError::Io(_) => ErrorKind::ExportFailed,
        }
    }

    /// True when the frame loop may log this and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExportError::Step { .. })
    }

    pub fn step(stage: &'static str, reason: impl std::fmt::Display) -> Self {
        ExportError::Step { stage, reason: reason.to_string() }
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        ExportError::SourceUnreadable { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T, E = ExportError> = std::result::Result<T, E>;
