//! peervisiond - detection pipeline daemon.
//!
//! Wires a frame source into the scheduler and prints one ResultBatch JSON
//! object per line to stdout, which is the contract the overlay renderer and
//! the benchmark collector consume. Without a model artifact the daemon runs
//! the stub backend (mock inference with simulated latency), which keeps the
//! end-to-end path exercisable on machines without a model download.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use peervision::detect::loader::{negotiate, LoadedModel};
use peervision::{
    FrameScheduler, FrameSource, PipelineConfig, ResultPublisher, StubBackend, SyntheticSource,
};

/// Simulated inference cost of the stub backend.
const STUB_LATENCY: Duration = Duration::from_millis(30);

#[derive(Parser, Debug)]
#[command(name = "peervisiond", about = "frame pipeline and detection scheduler daemon")]
struct Args {
    /// ONNX model artifact (requires the backend-tract build feature).
    #[arg(long, env = "PEERVISION_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Stop after this many source frames (0 = run until interrupted).
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = PipelineConfig::load()?;
    if args.model.is_some() {
        config.model_path = args.model;
    }

    let published = Arc::new(AtomicU64::new(0));
    let latency_ms_total = Arc::new(AtomicU64::new(0));
    let publisher = Arc::new(ResultPublisher::new());
    {
        let published = Arc::clone(&published);
        let latency_ms_total = Arc::clone(&latency_ms_total);
        publisher.set_consumer(move |batch| {
            match serde_json::to_string(&batch) {
                Ok(line) => {
                    let mut stdout = std::io::stdout().lock();
                    if writeln!(stdout, "{}", line).is_ok() {
                        let _ = stdout.flush();
                        published.fetch_add(1, Ordering::Relaxed);
                        latency_ms_total.fetch_add(
                            batch.inference_ts.saturating_sub(batch.recv_ts),
                            Ordering::Relaxed,
                        );
                    }
                }
                Err(e) => log::error!("failed to serialize result batch: {}", e),
            };
        });
    }

    let scheduler = FrameScheduler::new(
        &config,
        Arc::clone(&publisher),
        Box::new(|e| log::warn!("pipeline run failed: {:#}", e)),
    );

    // Load-time failure is fatal: the pipeline must not run with a
    // known-broken model configuration.
    let model = load_model(&config)?;
    scheduler.install_model(model);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let mut source = SyntheticSource::new(config.source.clone());
    let frame_interval = Duration::from_millis(1000 / config.source.target_fps.max(1) as u64);
    let mut last_health_log = Instant::now();
    let mut health = HealthWindow::default();
    let mut admitted = 0u64;
    let mut rejected = 0u64;

    log::info!(
        "peervisiond running: queue={} confidence={} nms={}",
        config.max_queue_size,
        config.thresholds.confidence,
        config.thresholds.nms
    );

    while running.load(Ordering::SeqCst) {
        let frame = source.next_frame()?;
        match scheduler.admit(frame) {
            Some(_) => admitted += 1,
            None => rejected += 1,
        }

        if args.frames > 0 && source.frames_produced() >= args.frames {
            break;
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let (avg_infer_ms, fps) = health.sample(
                published.load(Ordering::Relaxed),
                latency_ms_total.load(Ordering::Relaxed),
                last_health_log.elapsed(),
            );
            log::info!(
                "frames={} admitted={} rejected={} dropped={} published={} queue={} avg_infer_ms={} fps={:.1}",
                source.frames_produced(),
                admitted,
                rejected,
                scheduler.dropped_frames(),
                published.load(Ordering::Relaxed),
                scheduler.queue_len(),
                avg_infer_ms,
                fps
            );
            last_health_log = Instant::now();
        }

        std::thread::sleep(frame_interval);
    }

    // Stop admission and let the in-flight run finish before reporting.
    scheduler.stop();
    while !scheduler.is_idle() {
        std::thread::sleep(Duration::from_millis(10));
    }

    log::info!(
        "shutting down: {} frames, {} published, {} dropped",
        source.frames_produced(),
        published.load(Ordering::Relaxed),
        scheduler.dropped_frames()
    );
    Ok(())
}

/// Rolling per-interval health figures derived from the cumulative published
/// count and inference latency total.
#[derive(Default)]
struct HealthWindow {
    last_published: u64,
    last_latency_ms: u64,
}

impl HealthWindow {
    /// Average inference milliseconds and published fps over the interval
    /// since the previous sample.
    fn sample(&mut self, published: u64, latency_ms: u64, elapsed: Duration) -> (u64, f64) {
        let frames = published.saturating_sub(self.last_published);
        let avg_ms = if frames > 0 {
            latency_ms.saturating_sub(self.last_latency_ms) / frames
        } else {
            0
        };
        let fps = frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        self.last_published = published;
        self.last_latency_ms = latency_ms;
        (avg_ms, fps)
    }
}

fn load_model(config: &PipelineConfig) -> Result<LoadedModel> {
    match &config.model_path {
        Some(path) => {
            #[cfg(feature = "backend-tract")]
            {
                log::info!("loading ONNX model from {}", path.display());
                negotiate(
                    Box::new(peervision::detect::TractBackend::new(path)),
                    config.contract.clone(),
                )
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                anyhow::bail!(
                    "model path {} given, but peervisiond was built without the backend-tract feature",
                    path.display()
                )
            }
        }
        None => {
            log::warn!("no model artifact configured, using stub inference");
            negotiate(
                Box::new(StubBackend::new().with_latency(STUB_LATENCY)),
                config.contract.clone(),
            )
        }
    }
}
