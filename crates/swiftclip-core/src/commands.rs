// crates/swiftclip-core/src/commands.rs
//
// Every request the engine accepts is expressed as an EngineCommand.
// The command bridge (or the CLI) builds one; the worker turns it into an
// ExportBatch and runs it.

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{ExportError, Result};
use crate::job::{ExportBatch, ExportJob};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// One output. Runs as a batch of one.
    Export { source: PathBuf, job: ExportJob },
    /// Several outputs from one source, in order.
    MultiExport(ExportBatch),
}

impl EngineCommand {
    /// Parse a bridge request by method name (`export` / `multi_export`).
    ///
    /// `export` takes the job fields at the top level next to `sourcePath`;
    /// `multi_export` takes `{ sourcePath, jobs: [...] }`.
    pub fn from_request(method: &str, args: &Value) -> Result<Self> {
        match method {
            "export" => {
                let job_map = args.as_object().ok_or_else(|| {
                    ExportError::InvalidArguments("export args must be an object".into())
                })?;
                let job = ExportJob::from_map(job_map)?;
                let wrapped = serde_json::json!({
                    "sourcePath": args.get("sourcePath").cloned().unwrap_or(Value::Null),
                    "jobs": [Value::Object(job_map.clone())],
                });
                // Reuse the batch parser so the source check is identical.
                let batch = ExportBatch::from_request(&wrapped)?;
                Ok(EngineCommand::Export { source: batch.source_path, job })
            }
            "multi_export" => Ok(EngineCommand::MultiExport(ExportBatch::from_request(args)?)),
            other => Err(ExportError::InvalidArguments(format!(
                "unknown method '{other}'"
            ))),
        }
    }

    pub fn into_batch(self) -> ExportBatch {
        match self {
            EngineCommand::Export { source, job } => ExportBatch::new(source, vec![job]),
            EngineCommand::MultiExport(batch)     => batch,
        }
    }
}
