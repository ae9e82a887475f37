#![cfg(feature = "backend-tract")]

//! Tract-based ONNX inference backend.
//!
//! The model is compiled for a concrete input shape on the first run (the
//! loader's zero-input warm-up), so layout negotiation happens exactly once at
//! load time. After a successful run the compiled plan is pinned and any
//! differently-shaped input is an error, never a silent recompile.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, NamedTensor, RawOutput};
use crate::tensor::{Tensor as InputTensor, TensorData};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

pub struct TractBackend {
    model_path: PathBuf,
    plan: Option<(Vec<usize>, Plan)>,
    pinned: bool,
}

impl TractBackend {
    /// Point the backend at an ONNX artifact. Compilation is deferred until
    /// the warm-up run supplies the negotiated input shape.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            plan: None,
            pinned: false,
        }
    }

    fn compile(&self, shape: &[usize]) -> Result<Plan> {
        tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    shape.iter().copied().collect::<TVec<usize>>(),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, input: &InputTensor) -> Result<tract_onnx::prelude::Tensor> {
        let values = match &input.data {
            TensorData::F32(v) => v.as_slice(),
            // f16 execution is not wired up; the loader's fallback ladder
            // negotiates down to an f32 candidate instead.
            TensorData::F16(_) => bail!("tract backend: f16 inputs are not supported"),
        };
        let shape = input.shape();
        tract_ndarray::Array4::from_shape_vec(
            (shape[0], shape[1], shape[2], shape[3]),
            values.to_vec(),
        )
        .map(|a| a.into_tensor())
        .map_err(|e| anyhow!("input buffer does not match shape {:?}: {}", shape, e))
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn run(&mut self, input: &InputTensor) -> Result<RawOutput> {
        let shape: Vec<usize> = input.shape().to_vec();

        match &self.plan {
            Some((compiled, _)) if *compiled != shape => {
                bail!(
                    "input shape {:?} does not match compiled shape {:?}",
                    shape,
                    compiled
                );
            }
            Some(_) => {}
            None => {
                let plan = self.compile(&shape)?;
                self.plan = Some((shape.clone(), plan));
            }
        }

        let tensor = self.build_input(input)?;
        let (_, plan) = self.plan.as_ref().ok_or_else(|| anyhow!("no model plan"))?;

        let outputs = match plan.run(tvec!(tensor.into())) {
            Ok(outputs) => outputs,
            Err(e) => {
                if !self.pinned {
                    // A candidate that compiles but cannot execute is rejected
                    // by the loader; drop the plan so the next candidate
                    // recompiles. Post-warm-up runtime errors keep the plan.
                    self.plan = None;
                }
                return Err(anyhow!("ONNX inference failed: {}", e));
            }
        };
        self.pinned = true;

        outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                let view = output
                    .to_array_view::<f32>()
                    .with_context(|| format!("model output {} was not f32", i))?;
                Ok(NamedTensor::new(
                    format!("output_{}", i),
                    view.shape().to_vec(),
                    view.iter().copied().collect(),
                ))
            })
            .collect()
    }
}
