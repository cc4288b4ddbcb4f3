// crates/swiftclip-media/src/engine.rs
//
// Engine: runs an ExportBatch job by job on the calling thread.
//
// Per job the strategy comes from the job itself:
//   StreamCopy    → FastStreamCopier (no GPU, no codecs)
//   GpuTransform  → RenderGraph on the batch's GpuContextManager
//
// The GPU context is created on the first GPU job and shared by every later
// GPU job of the batch, then released when the batch ends however it ends.
// A batch of copy jobs never touches the GPU.
//
// With `decoder.reuse_across_jobs`, a graph hands its decoder to the next GPU
// job instead of destroying it; the next graph rebinds or recreates it.
//
// The first unrecoverable failure aborts the rest of the batch. There is no
// partial success: the caller gets that one error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use swiftclip_core::config::EngineConfig;
use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::job::{ExportBatch, Strategy};
use swiftclip_core::progress::BatchProgress;

use crate::decoder::HardwareDecoder;
use crate::gpu::GpuContextManager;
use crate::graph::RenderGraph;
use crate::platform::MediaPlatform;
use crate::pool::EncoderPool;
use crate::remux::FastStreamCopier;

pub struct Engine {
    platform: Arc<dyn MediaPlatform>,
    pool:     Arc<EncoderPool>,
    config:   EngineConfig,
}

impl Engine {
    /// Validates `config` and builds a fresh encoder pool for it.
    pub fn new(platform: Arc<dyn MediaPlatform>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(EncoderPool::new(Arc::clone(&platform), config.encoder.clone(), &config.pool));
        Ok(Self { platform, pool, config })
    }

    /// Share an existing pool, e.g. one that outlives several engines.
    pub fn with_pool(platform: Arc<dyn MediaPlatform>, pool: Arc<EncoderPool>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { platform, pool, config })
    }

    pub fn pool(&self) -> &Arc<EncoderPool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn platform_name(&self) -> &str {
        self.platform.name()
    }

    /// Run every job in order. Returns the last job's destination.
    ///
    /// The batch is validated before anything is opened. Progress is the
    /// batch-wide `(index + fraction) / count`, non-decreasing, and ends with
    /// exactly 1.0 on success.
    pub fn run_batch(&self, batch: &ExportBatch, on_progress: &mut dyn FnMut(f32)) -> Result<PathBuf> {
        batch.validate()?;

        let started = Instant::now();
        info!(
            source   = %batch.source_path.display(),
            jobs     = batch.jobs.len(),
            platform = self.platform.name(),
            "batch started"
        );

        let mut gpu: Option<GpuContextManager> = None;
        let mut carried: Option<HardwareDecoder> = None;
        let result = self.run_jobs(batch, &mut gpu, &mut carried, on_progress);

        if let Some(mut decoder) = carried.take() {
            decoder.release();
        }
        if let Some(mut ctx) = gpu.take() {
            ctx.release();
        }

        match &result {
            Ok(last) => info!(
                dest    = %last.display(),
                elapsed = ?started.elapsed(),
                created = self.pool.created(),
                reused  = self.pool.reused(),
                "batch finished"
            ),
            Err(e) => warn!(kind = %e.kind(), "batch aborted: {e}"),
        }
        result
    }

    fn run_jobs(
        &self,
        batch:       &ExportBatch,
        gpu:         &mut Option<GpuContextManager>,
        carried:     &mut Option<HardwareDecoder>,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf> {
        let mut progress = BatchProgress::new(batch.jobs.len());
        let mut last = None;

        for (index, job) in batch.jobs.iter().enumerate() {
            let strategy = job.strategy();
            debug!(index, dest = %job.destination_path.display(), ?strategy, "job started");
            let mut report = |f: f32| on_progress(progress.scale(index, f));

            match strategy {
                Strategy::StreamCopy => {
                    FastStreamCopier::new(self.platform.as_ref(), &self.config.render)
                        .copy(&batch.source_path, job, &mut report)?;
                }
                Strategy::GpuTransform => {
                    let keep = self.config.decoder.reuse_across_jobs
                        && batch.jobs[index + 1..]
                            .iter()
                            .any(|j| j.strategy() == Strategy::GpuTransform);
                    let ctx = self.ensure_gpu(gpu)?;
                    let mut graph = RenderGraph::setup(
                        ctx,
                        &self.pool,
                        &self.config,
                        self.platform.as_ref(),
                        &batch.source_path,
                        job,
                        carried.take(),
                    )?;
                    graph.execute(&mut report)?;
                    *carried = graph.release(keep);
                }
            }
            last = Some(job.destination_path.clone());
        }

        on_progress(progress.complete());
        last.ok_or_else(|| ExportError::InvalidArguments("batch has no jobs".into()))
    }

    fn ensure_gpu<'g>(&self, slot: &'g mut Option<GpuContextManager>) -> Result<&'g mut GpuContextManager> {
        if slot.is_none() {
            *slot = Some(GpuContextManager::new(self.platform.as_ref())?);
        }
        slot.as_mut()
            .ok_or_else(|| ExportError::GpuInit("GPU context unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{EncoderOutput, TrackFormat};
    use crate::testkit::MockPlatform;
    use std::path::Path;
    use swiftclip_core::job::{CropRect, ExportJob};

    fn engine(platform: &Arc<MockPlatform>) -> Engine {
        engine_with(platform, EngineConfig::default())
    }

    fn engine_with(platform: &Arc<MockPlatform>, config: EngineConfig) -> Engine {
        let p: Arc<dyn MediaPlatform> = platform.clone();
        Engine::new(p, config).unwrap()
    }

    fn copy_job(dest: &str, start_ms: i64, duration_ms: i64) -> ExportJob {
        let mut job = ExportJob::new(dest);
        job.start_time_ms = start_ms;
        job.duration_ms = duration_ms;
        job
    }

    fn crop_job(dest: &str, start_ms: i64, duration_ms: i64) -> ExportJob {
        let mut job = copy_job(dest, start_ms, duration_ms);
        job.crop_rect = CropRect { x: 0.1, y: 0.1, w: 0.8, h: 0.8 };
        job.target_width = 16;
        job.target_height = 16;
        job
    }

    fn run(engine: &Engine, jobs: Vec<ExportJob>) -> (Result<PathBuf>, Vec<f32>) {
        let batch = ExportBatch::new("in.mp4", jobs);
        let mut progress = Vec::new();
        let result = engine.run_batch(&batch, &mut |v| progress.push(v));
        (result, progress)
    }

    #[test]
    fn uncropped_trim_takes_the_copy_path_without_gpu() {
        // GPU creation would fail; a copy-only batch must never ask for it.
        let platform = Arc::new(MockPlatform::new().with_gpu_failure());
        let (result, progress) = run(&engine(&platform), vec![copy_job("head.mp4", 0, 5_000)]);
        assert_eq!(result.unwrap(), PathBuf::from("head.mp4"));

        let log = platform.sink(Path::new("head.mp4")).unwrap();
        assert_eq!(log.video_samples()[0].pts_us, 0);
        let span = log.video_span_us(33_333);
        assert!((span - 5_000_000).abs() <= 33_334, "span {span}");
        assert_eq!(platform.count(|s| &s.decoders_created), 0);
        assert_eq!(platform.count(|s| &s.encoders_created), 0);
        assert_eq!(progress.last().copied(), Some(1.0));
    }

    #[test]
    fn cropped_job_takes_the_gpu_path() {
        let platform = Arc::new(MockPlatform::new());
        let (result, _) = run(&engine(&platform), vec![crop_job("crop.mp4", 2_000, -1)]);
        assert_eq!(result.unwrap(), PathBuf::from("crop.mp4"));

        let log = platform.sink(Path::new("crop.mp4")).unwrap();
        assert!(log.stopped);
        assert_eq!(log.video_samples()[0].pts_us, 0);
        let span = log.video_span_us(33_333);
        assert!((span - 8_000_000).abs() <= 33_334, "span {span}");
        assert_eq!(platform.count(|s| &s.decoders_created), 1);
    }

    #[test]
    fn audio_overlay_forces_the_gpu_path() {
        let platform = Arc::new(MockPlatform::new());
        let mut job = copy_job("overlay.mp4", 0, 1_000);
        job.target_width = 16;
        job.target_height = 16;
        job.has_audio_overlay = true;
        run(&engine(&platform), vec![job]).0.unwrap();
        assert_eq!(platform.count(|s| &s.decoders_created), 1);
    }

    #[test]
    fn batch_progress_is_scaled_per_job() {
        let platform = Arc::new(MockPlatform::new());
        let (result, progress) = run(
            &engine(&platform),
            vec![copy_job("a.mp4", 0, 1_000), copy_job("b.mp4", 1_000, 1_000)],
        );
        assert_eq!(result.unwrap(), PathBuf::from("b.mp4"));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert!(progress.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(progress.contains(&0.5), "first job ends at half the batch");
        assert_eq!(progress.last().copied(), Some(1.0));
    }

    #[test]
    fn gpu_init_failure_aborts_the_batch() {
        let platform = Arc::new(MockPlatform::new().with_gpu_failure());
        let (result, progress) = run(
            &engine(&platform),
            vec![crop_job("a.mp4", 0, 1_000), copy_job("b.mp4", 0, 1_000)],
        );
        assert_eq!(result.unwrap_err().kind().code(), "GPU_INIT_FAILURE");
        assert_eq!(platform.sink_count(), 0, "later jobs never ran");
        assert!(!progress.contains(&1.0));
    }

    #[test]
    fn invalid_job_is_rejected_before_any_work() {
        let platform = Arc::new(MockPlatform::new());
        let mut bad = copy_job("b.mp4", 0, 1_000);
        bad.target_width = 0;
        let (result, progress) = run(&engine(&platform), vec![copy_job("a.mp4", 0, 1_000), bad]);
        assert_eq!(result.unwrap_err().kind().code(), "INVALID_ARGS");
        assert_eq!(platform.count(|s| &s.sources_opened), 0);
        assert!(progress.is_empty());
    }

    #[test]
    fn failing_job_aborts_the_remaining_jobs() {
        let format = TrackFormat::video("h264", 16, 16);
        let platform = Arc::new(MockPlatform::new().with_encoder_script(vec![
            EncoderOutput::FormatChanged(format.clone()),
            EncoderOutput::FormatChanged(format),
        ]));
        let (result, _) = run(
            &engine(&platform),
            vec![copy_job("a.mp4", 0, 500), crop_job("b.mp4", 0, 500), copy_job("c.mp4", 0, 500)],
        );
        assert_eq!(result.unwrap_err().kind().code(), "MUXER_ORDERING_ERROR");
        assert!(platform.sink(Path::new("c.mp4")).is_none());
    }

    #[test]
    fn decoder_is_handed_between_gpu_jobs() {
        let platform = Arc::new(MockPlatform::new());
        run(
            &engine(&platform),
            vec![crop_job("a.mp4", 0, 500), crop_job("b.mp4", 1_000, 500)],
        )
        .0
        .unwrap();
        assert_eq!(platform.count(|s| &s.decoders_created), 1);
        assert_eq!(platform.count(|s| &s.decoder_rebinds), 1);
        assert_eq!(platform.count(|s| &s.decoders_stopped), 1, "released at batch end");
    }

    #[test]
    fn decoder_reuse_can_be_disabled() {
        let platform = Arc::new(MockPlatform::new());
        let mut config = EngineConfig::default();
        config.decoder.reuse_across_jobs = false;
        run(
            &engine_with(&platform, config),
            vec![crop_job("a.mp4", 0, 500), crop_job("b.mp4", 0, 500)],
        )
        .0
        .unwrap();
        assert_eq!(platform.count(|s| &s.decoders_created), 2);
        assert_eq!(platform.count(|s| &s.decoder_rebinds), 0);
    }

    #[test]
    fn pool_outlives_the_batch() {
        let platform = Arc::new(MockPlatform::new());
        let engine = engine(&platform);
        run(&engine, vec![crop_job("a.mp4", 0, 300)]).0.unwrap();
        run(&engine, vec![crop_job("b.mp4", 0, 300)]).0.unwrap();
        assert_eq!(engine.pool().created(), 1);
        assert_eq!(engine.pool().reused(), 1);
        assert!(platform.sink(Path::new("b.mp4")).unwrap().stopped);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let platform: Arc<dyn MediaPlatform> = Arc::new(MockPlatform::new());
        let mut config = EngineConfig::default();
        config.encoder.frame_rate = 0;
        let err = Engine::new(platform, config).err().map(|e| e.kind().code());
        assert_eq!(err, Some("INVALID_ARGS"));
    }
}
