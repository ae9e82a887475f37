//! peervision - frame pipeline and backpressure-aware detection scheduler.
//!
//! This crate is the core of a phone-to-desktop live detection system: it
//! accepts a continuous, variable-rate stream of decoded video frames,
//! bounds queueing with a drop-oldest policy, serializes exactly one
//! in-flight inference call, decodes raw model output into normalized
//! detections via non-maximum suppression, and publishes timestamped
//! `ResultBatch` values to a single consumer.
//!
//! Everything around the core (peer-to-peer transport, signaling, overlay
//! rendering, model acquisition) is an external collaborator. The `source`
//! module defines the seam the transport plugs into.

pub mod config;
pub mod detect;
pub mod frame;
pub mod preprocess;
pub mod publish;
pub mod scheduler;
pub mod source;
pub mod tensor;

pub use config::{PipelineConfig, SourceSettings, Thresholds};
pub use detect::{InferenceBackend, LoadedModel, ModelContract, ModelFamily, StubBackend};
pub use frame::{AdmissionQueue, Frame};
pub use publish::{Detection, ResultBatch, ResultPublisher};
pub use scheduler::FrameScheduler;
pub use source::{FrameSource, SyntheticSource};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since epoch. Latency figures derived from these
/// timestamps are approximations; clocks are not synchronized across peers.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
