// crates/swiftclip-media/src/worker.rs
//
// ExportWorker: the one thread that runs batches.
//
// Requests go in over a crossbeam channel and are run strictly in order, so
// GPU use and pool access across batches are sequential by construction.
// Every result comes back on `rx` as a WorkerEvent tagged with the batch id
// handed out by `submit`:
//
//   Progress { value }   zero or more, non-decreasing, last one 1.0 on success
//   Done { path }        exactly one of Done / Failed per batch
//   Failed { kind, msg }
//
// The encoder pool lives as long as the worker; `shutdown` joins the thread
// and then destroys every idle encoder.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use swiftclip_core::commands::EngineCommand;
use swiftclip_core::config::EngineConfig;
use swiftclip_core::error::{ErrorKind, Result};
use swiftclip_core::job::ExportBatch;
use swiftclip_core::media_types::WorkerEvent;

use crate::engine::Engine;
use crate::platform::MediaPlatform;
use crate::pool::EncoderPool;

enum Request {
    Run { id: Uuid, batch: ExportBatch },
    Shutdown,
}

pub struct ExportWorker {
    /// Progress and results for every submitted batch.
    pub rx:  Receiver<WorkerEvent>,
    tx:      Sender<WorkerEvent>,
    req_tx:  Sender<Request>,
    pool:    Arc<EncoderPool>,
    handle:  Option<JoinHandle<()>>,
}

impl ExportWorker {
    pub fn new(platform: Arc<dyn MediaPlatform>, config: EngineConfig) -> Result<Self> {
        let engine = Engine::new(platform, config)?;
        let pool = Arc::clone(engine.pool());
        let (tx, rx) = unbounded::<WorkerEvent>();
        let (req_tx, req_rx) = unbounded::<Request>();

        let result_tx = tx.clone();
        let handle = thread::Builder::new()
            .name("swiftclip-export".into())
            .spawn(move || run_loop(engine, req_rx, result_tx))?;

        Ok(Self { rx, tx, req_tx, pool, handle: Some(handle) })
    }

    /// Queue a batch. The returned id tags every event for it.
    pub fn submit(&self, batch: ExportBatch) -> Uuid {
        let id = Uuid::new_v4();
        if self.req_tx.send(Request::Run { id, batch }).is_err() {
            let _ = self.tx.send(WorkerEvent::Failed {
                batch_id: id,
                kind:     ErrorKind::ExportFailed,
                msg:      "export worker is not running".into(),
            });
        }
        id
    }

    pub fn submit_command(&self, command: EngineCommand) -> Uuid {
        self.submit(command.into_batch())
    }

    pub fn pool(&self) -> &Arc<EncoderPool> {
        &self.pool
    }

    /// Finish the batch in flight, stop the thread and empty the pool.
    /// Batches still queued behind the shutdown request are not run.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        let _ = self.req_tx.send(Request::Shutdown);
        if handle.join().is_err() {
            warn!("export worker thread panicked");
        }
        self.pool.clear();
        info!("export worker stopped");
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(engine: Engine, requests: Receiver<Request>, tx: Sender<WorkerEvent>) {
    debug!(platform = engine.platform_name(), "export worker started");
    for request in requests.iter() {
        let (batch_id, batch) = match request {
            Request::Run { id, batch } => (id, batch),
            Request::Shutdown => break,
        };

        let mut on_progress = |value: f32| {
            let _ = tx.send(WorkerEvent::Progress { batch_id, value });
        };
        let event = match engine.run_batch(&batch, &mut on_progress) {
            Ok(path) => WorkerEvent::Done { batch_id, path },
            Err(e) => WorkerEvent::Failed { batch_id, kind: e.kind(), msg: e.to_string() },
        };
        if tx.send(event).is_err() {
            debug!(%batch_id, "result receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockPlatform;
    use std::time::Duration;
    use swiftclip_core::job::{CropRect, ExportJob};

    fn worker(platform: MockPlatform) -> ExportWorker {
        ExportWorker::new(Arc::new(platform), EngineConfig::default()).unwrap()
    }

    /// Every event for `id` up to and including its Done / Failed.
    fn collect(worker: &ExportWorker, id: Uuid) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            let ev = worker.rx.recv_timeout(Duration::from_secs(30)).unwrap();
            if ev.batch_id() != id {
                continue;
            }
            let last = !matches!(ev, WorkerEvent::Progress { .. });
            events.push(ev);
            if last {
                return events;
            }
        }
    }

    fn batch(dest: &str) -> ExportBatch {
        let mut job = ExportJob::new(dest);
        job.duration_ms = 1_000;
        ExportBatch::new("in.mp4", vec![job])
    }

    #[test]
    fn batch_reports_progress_then_done() {
        let w = worker(MockPlatform::new());
        let id = w.submit(batch("out.mp4"));
        let events = collect(&w, id);

        let (last, progress) = events.split_last().unwrap();
        assert_eq!(last, &WorkerEvent::Done { batch_id: id, path: "out.mp4".into() });
        let values: Vec<f32> = progress
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last().copied(), Some(1.0));
    }

    #[test]
    fn batches_run_in_submission_order() {
        let w = worker(MockPlatform::new());
        let first = w.submit(batch("a.mp4"));
        let second = w.submit(batch("b.mp4"));

        let mut order = Vec::new();
        while order.len() < 2 {
            match w.rx.recv_timeout(Duration::from_secs(30)).unwrap() {
                WorkerEvent::Done { batch_id, .. } | WorkerEvent::Failed { batch_id, .. } => order.push(batch_id),
                WorkerEvent::Progress { .. } => {}
            }
        }
        assert_eq!(order, vec![first, second]);
    }

    #[test]
    fn failure_is_reported_with_its_kind() {
        let w = worker(MockPlatform::new().without_media());
        let id = w.submit(batch("out.mp4"));
        let events = collect(&w, id);
        match events.last() {
            Some(WorkerEvent::Failed { kind, .. }) => assert_eq!(*kind, ErrorKind::SourceUnreadable),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_joins_and_empties_the_pool() {
        let mut w = worker(MockPlatform::new());
        let mut job = ExportJob::new("crop.mp4");
        job.duration_ms = 300;
        job.crop_rect = CropRect { x: 0.0, y: 0.0, w: 0.5, h: 0.5 };
        job.target_width = 16;
        job.target_height = 16;
        let id = w.submit(ExportBatch::new("in.mp4", vec![job]));
        collect(&w, id);
        assert_eq!(w.pool().idle_count(16, 16), 1);

        w.shutdown();
        assert_eq!(w.pool().idle_count(16, 16), 0);

        let late = w.submit(batch("late.mp4"));
        let events = collect(&w, late);
        assert!(matches!(events.last(), Some(WorkerEvent::Failed { .. })));
    }
}
