//! Inference backend trait.

use anyhow::Result;

use crate::tensor::Tensor;

/// One named output tensor from a single inference call. Backends convert
/// their native output element type to f32 before handing tensors back.
#[derive(Clone, Debug)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }
}

/// Raw model output: one or more named tensors, ordering preserved from the
/// model's own output declaration (multi-scale models emit shallowest first).
pub type RawOutput = Vec<NamedTensor>;

/// A loaded model exposing a single blocking run operation.
///
/// `run` is synchronous from the scheduler's point of view; the pipeline
/// serializes calls, so implementations never see concurrent invocations.
/// Shape and layout questions are settled once at load time by the warm-up
/// negotiation in `detect::loader`; implementations must not retry with a
/// different shape per frame.
pub trait InferenceBackend: Send {
    /// Backend identifier, for logs.
    fn name(&self) -> &'static str;

    /// Run one inference call.
    fn run(&mut self, input: &Tensor) -> Result<RawOutput>;
}
