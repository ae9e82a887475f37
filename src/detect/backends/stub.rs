//! Stub inference backend.
//!
//! Stands in for a real model when no artifact is available (the daemon's
//! mock-inference mode) and gives tests a backend with controllable latency,
//! canned outputs, and injectable failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, NamedTensor, RawOutput};
use crate::tensor::Tensor;

pub struct StubBackend {
    latency: Duration,
    template: Option<RawOutput>,
    failures_left: u32,
    runs: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            template: None,
            failures_left: 0,
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sleep this long on every run, simulating inference cost.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Return a clone of this output on every run instead of the synthetic
    /// default.
    pub fn with_output(mut self, output: RawOutput) -> Self {
        self.template = Some(output);
        self
    }

    /// Fail the next `count` runs with an error before succeeding again.
    pub fn with_failures(mut self, count: u32) -> Self {
        self.failures_left = count;
        self
    }

    /// Shared run counter; keeps counting after the backend moves into the
    /// scheduler.
    pub fn run_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.runs)
    }

    /// Synthetic dense output: one centered box covering half the input,
    /// class 0 ("person" under the COCO table), confidence ~0.9.
    fn synthesize(input: &Tensor) -> RawOutput {
        let w = input.width as f32;
        let h = input.height as f32;
        // logit(0.95): 0.95 objectness * 0.95 class score ~= 0.90 confidence.
        let hot = 2.9444;
        let mut row = vec![w / 2.0, h / 2.0, w / 2.0, h / 2.0, hot, hot];
        row.extend(std::iter::repeat(-10.0).take(79));
        vec![NamedTensor::new("output", vec![1, 1, 85], row)]
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn run(&mut self, input: &Tensor) -> Result<RawOutput> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.runs.fetch_add(1, Ordering::Relaxed);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(anyhow!("stub backend: injected inference failure"));
        }
        Ok(match &self.template {
            Some(output) => output.clone(),
            None => Self::synthesize(input),
        })
    }
}
