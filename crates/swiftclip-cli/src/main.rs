// crates/swiftclip-cli/src/main.rs
//
// `swiftclip`: submit one batch to an ExportWorker on the desktop platform and
// stream its events to stdout as JSON lines:
//
//   {"event":"progress","value":0.25}
//   {"event":"done","path":"/out.mp4"}
//   {"event":"error","code":"CODEC_INIT_FAILURE","message":"..."}
//
// Logs go to stderr so stdout stays machine-readable. Exit status is non-zero
// whenever the batch (or setup) failed.

mod cli;

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swiftclip_core::error::ExportError;
use swiftclip_core::{EngineCommand, EngineConfig, EngineEvent, ExportBatch, WorkerEvent};
use swiftclip_media::{DesktopPlatform, ExportWorker};

use crate::cli::Commands;

fn main() -> ExitCode {
    let args = cli::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if let Some(export) = e.downcast_ref::<ExportError>() {
                let _ = emit(&EngineEvent::failure(export));
            }
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swiftclip={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: cli::Cli) -> Result<bool> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let batch = match args.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            return Ok(true);
        }
        Commands::Batch { request } => load_request(&request)?,
        Commands::Export { source, dest, start_ms, duration_ms, crop, width, height, audio } => {
            let job = cli::export_job(dest, start_ms, duration_ms, crop, width, height, audio);
            EngineCommand::Export { source, job }.into_batch()
        }
    };

    export(config, batch)
}

/// A request file holds either a bare batch or a `{ method, args }` envelope.
fn load_request(path: &Path) -> Result<ExportBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ExportError::InvalidArguments(format!("request is not valid JSON: {e}")))?;

    let batch = match value.get("method").and_then(Value::as_str) {
        Some(method) => {
            let args = value.get("args").unwrap_or(&Value::Null);
            EngineCommand::from_request(method, args)?.into_batch()
        }
        None => ExportBatch::from_request(&value)?,
    };
    Ok(batch)
}

fn export(config: EngineConfig, batch: ExportBatch) -> Result<bool> {
    let platform = DesktopPlatform::new(&config)?;
    let mut worker = ExportWorker::new(Arc::new(platform), config).context("starting export worker")?;

    info!(source = %batch.source_path.display(), jobs = batch.jobs.len(), "submitting batch");
    let id = worker.submit(batch);

    let ok = loop {
        let event = worker.rx.recv().context("export worker hung up")?;
        if event.batch_id() != id {
            continue;
        }
        emit(&event.to_engine_event())?;
        match event {
            WorkerEvent::Progress { .. } => {}
            WorkerEvent::Done { .. } => break true,
            WorkerEvent::Failed { .. } => break false,
        }
    };

    worker.shutdown();
    Ok(ok)
}

fn emit(event: &EngineEvent) -> Result<()> {
    let line = serde_json::to_string(event)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}
