//! Frame scheduler: admission, backpressure, and the processing loop.
//!
//! The scheduler accepts frames at arbitrary rate and never blocks the
//! caller. Frames wait in a bounded drop-oldest queue; a single worker thread
//! dequeues the oldest retained frame and runs the full
//! preprocess -> inference -> decode -> suppress -> publish chain, so at most
//! one pipeline execution is ever in flight and results are published in
//! dequeue order. Sustained overload silently discards frames; that is the
//! backpressure contract, not a failure mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::config::{PipelineConfig, Thresholds};
use crate::detect::loader::LoadedModel;
use crate::detect::{decode, nms};
use crate::frame::{AdmissionQueue, Frame};
use crate::now_millis;
use crate::preprocess;
use crate::publish::{ResultBatch, ResultPublisher};

/// Called once per failed pipeline run. Runs on the worker thread.
pub type ErrorCallback = Box<dyn FnMut(anyhow::Error) + Send>;

struct SchedulerState {
    queue: AdmissionQueue,
    is_processing: bool,
    stopped: bool,
    shutdown: bool,
    dropped_frames: u64,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
    model: Mutex<Option<LoadedModel>>,
    /// Admission fast-path readiness check; avoids touching the model mutex
    /// (held for the duration of an inference call) from `admit`.
    model_ready: AtomicBool,
    thresholds: Mutex<Thresholds>,
    publisher: Arc<ResultPublisher>,
}

/// Backpressure-aware detection scheduler.
pub struct FrameScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    /// Construct the scheduler and spawn its worker thread.
    ///
    /// The scheduler starts without a model; admissions are rejected until
    /// `install_model` is called, so a transport may begin delivering frames
    /// while the model is still loading.
    pub fn new(
        config: &PipelineConfig,
        publisher: Arc<ResultPublisher>,
        on_error: ErrorCallback,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                queue: AdmissionQueue::new(config.max_queue_size),
                is_processing: false,
                stopped: false,
                shutdown: false,
                dropped_frames: 0,
            }),
            wake: Condvar::new(),
            model: Mutex::new(None),
            model_ready: AtomicBool::new(false),
            thresholds: Mutex::new(config.thresholds),
            publisher,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("peervision-pipeline".to_string())
            .spawn(move || worker_loop(worker_shared, on_error))
            .ok();

        Self { shared, worker }
    }

    /// Install the warmed-up model and open admission.
    pub fn install_model(&self, model: LoadedModel) {
        log::info!(
            "installing model ({} backend, {}x{} input)",
            model.backend_name(),
            model.contract().input_width,
            model.contract().input_height
        );
        if let Ok(mut slot) = self.shared.model.lock() {
            *slot = Some(model);
            self.shared.model_ready.store(true, Ordering::Release);
        }
    }

    /// Offer a frame for processing. Never blocks and never errors.
    ///
    /// Returns the frame's id when admitted, or `None` when the model is not
    /// ready or the scheduler is stopped. Admitting into a full queue evicts
    /// the oldest retained frame.
    pub fn admit(&self, frame: Frame) -> Option<String> {
        if !self.shared.model_ready.load(Ordering::Acquire) {
            return None;
        }

        let id = {
            let mut state = self.shared.state.lock().ok()?;
            if state.stopped || state.shutdown {
                return None;
            }
            let id = frame.id.clone();
            if let Some(evicted) = state.queue.push(frame) {
                state.dropped_frames += 1;
                log::debug!("queue full, dropped frame {}", evicted.id);
            }
            id
        };

        self.shared.wake.notify_one();
        Some(id)
    }

    /// Stop accepting new work and discard all queued frames. An in-flight
    /// pipeline run finishes naturally.
    pub fn stop(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.stopped = true;
            let discarded = state.queue.len();
            state.queue.clear();
            if discarded > 0 {
                log::info!("scheduler stopped, discarded {} queued frames", discarded);
            }
        }
        self.shared.wake.notify_all();
    }

    /// Re-open admission with an empty queue.
    pub fn resume(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.stopped = false;
        }
        self.shared.wake.notify_all();
    }

    /// Replace decode/suppression thresholds. Takes effect starting with the
    /// next dequeued frame, not the one in flight.
    pub fn update_thresholds(&self, thresholds: Thresholds) {
        if let Ok(mut slot) = self.shared.thresholds.lock() {
            *slot = thresholds;
        }
    }

    pub fn is_processing(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|s| s.is_processing)
            .unwrap_or(false)
    }

    pub fn queue_len(&self) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.queue.len())
            .unwrap_or(0)
    }

    /// Frames evicted by backpressure since construction.
    pub fn dropped_frames(&self) -> u64 {
        self.shared
            .state
            .lock()
            .map(|s| s.dropped_frames)
            .unwrap_or(0)
    }

    /// True once the queue is empty and nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|s| s.queue.is_empty() && !s.is_processing)
            .unwrap_or(true)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
            state.queue.clear();
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, mut on_error: ErrorCallback) {
    loop {
        let frame = {
            let mut state = match shared.state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            loop {
                if state.shutdown {
                    return;
                }
                if !state.stopped {
                    if let Some(frame) = state.queue.pop_oldest() {
                        state.is_processing = true;
                        break frame;
                    }
                }
                state = match shared.wake.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        };

        let recv_ts = now_millis();
        let thresholds = shared
            .thresholds
            .lock()
            .map(|t| *t)
            .unwrap_or_default();

        match process_frame(&shared, frame, recv_ts, thresholds) {
            Ok(Some(batch)) => shared.publisher.publish(batch),
            Ok(None) => {}
            Err(e) => on_error(e),
        }

        if let Ok(mut state) = shared.state.lock() {
            state.is_processing = false;
        }
        // Loop continues immediately; a non-empty queue needs no wake-up.
    }
}

/// One full pipeline run. `Ok(None)` means the frame was unusable and is
/// skipped without producing a result.
fn process_frame(
    shared: &Shared,
    frame: Frame,
    recv_ts: u64,
    thresholds: Thresholds,
) -> Result<Option<ResultBatch>> {
    let mut guard = shared
        .model
        .lock()
        .map_err(|_| anyhow!("model lock poisoned"))?;
    let model = guard
        .as_mut()
        .ok_or_else(|| anyhow!("frame {} dequeued with no model installed", frame.id))?;

    let Some(tensor) = preprocess::prepare(&frame, model.contract())? else {
        log::debug!("frame {} has no spatial dimensions, skipped", frame.id);
        return Ok(None);
    };

    let raw = model
        .run(&tensor)
        .with_context(|| format!("inference failed for frame {}", frame.id))?;
    let candidates = decode::decode(&raw, model.contract(), thresholds.confidence)
        .with_context(|| format!("output decode failed for frame {}", frame.id))?;
    let detections = nms::suppress(candidates, thresholds.nms);
    let inference_ts = now_millis();

    Ok(Some(ResultBatch {
        frame_id: frame.id,
        capture_ts: frame.capture_ts,
        recv_ts,
        inference_ts,
        detections,
    }))
}
