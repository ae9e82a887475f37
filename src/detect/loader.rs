//! Load-time model negotiation.
//!
//! A model artifact's declared layout and dtype can disagree with its actual
//! runtime behavior. Rather than retrying shapes per frame, the loader runs a
//! zero-filled warm-up once per candidate configuration and adopts the first
//! one that completes. The warm-up also keeps the first real frame's latency
//! honest. If every candidate fails, the pipeline must not run at all.

use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, RawOutput};
use crate::detect::contract::ModelContract;
use crate::tensor::{Tensor, TensorDtype, TensorLayout};

/// A backend that survived warm-up, paired with its adopted contract.
pub struct LoadedModel {
    backend: Box<dyn InferenceBackend>,
    contract: ModelContract,
}

impl LoadedModel {
    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn run(&mut self, input: &Tensor) -> Result<RawOutput> {
        self.backend.run(input)
    }
}

/// Try the declared contract, then fallbacks, against a zero-input inference.
///
/// Fatal when all candidates fail: the caller must surface the error instead
/// of running with a known-broken configuration.
pub fn negotiate(
    mut backend: Box<dyn InferenceBackend>,
    declared: ModelContract,
) -> Result<LoadedModel> {
    let candidates = candidate_contracts(&declared);
    let mut last_error = None;

    for contract in candidates {
        let zero = Tensor::zeros(
            contract.layout,
            contract.input_height as usize,
            contract.input_width as usize,
            3,
            contract.dtype,
        );
        match backend.run(&zero) {
            Ok(_) => {
                log::info!(
                    "model warm-up ok on {}: {}x{} {:?}/{:?}",
                    backend.name(),
                    contract.input_width,
                    contract.input_height,
                    contract.layout,
                    contract.dtype,
                );
                return Ok(LoadedModel { backend, contract });
            }
            Err(e) => {
                log::warn!(
                    "model warm-up failed for {:?}/{:?}: {:#}",
                    contract.layout,
                    contract.dtype,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => e.context("model failed warm-up under every candidate configuration"),
        None => anyhow!("model failed warm-up under every candidate configuration"),
    })
}

/// Ordered fallback ladder: declaration first, then layout flip, then (for
/// f16 declarations) the same pair widened to f32.
fn candidate_contracts(declared: &ModelContract) -> Vec<ModelContract> {
    let mut candidates = vec![declared.clone()];

    let flipped = ModelContract {
        layout: flip(declared.layout),
        ..declared.clone()
    };
    candidates.push(flipped);

    if declared.dtype == TensorDtype::F16 {
        for layout in [declared.layout, flip(declared.layout)] {
            candidates.push(ModelContract {
                layout,
                dtype: TensorDtype::F32,
                ..declared.clone()
            });
        }
    }

    candidates
}

fn flip(layout: TensorLayout) -> TensorLayout {
    match layout {
        TensorLayout::Nchw => TensorLayout::Nhwc,
        TensorLayout::Nhwc => TensorLayout::Nchw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::NamedTensor;
    use crate::detect::contract::{coco_labels, ModelFamily};

    fn declared(layout: TensorLayout, dtype: TensorDtype) -> ModelContract {
        ModelContract {
            input_width: 320,
            input_height: 240,
            layout,
            dtype,
            family: ModelFamily::SingleDense { classes: 80 },
            labels: coco_labels(),
        }
    }

    /// Backend that only accepts one layout/dtype pair, for ladder tests.
    struct PickyBackend {
        accepts: (TensorLayout, TensorDtype),
        runs: u32,
    }

    impl InferenceBackend for PickyBackend {
        fn name(&self) -> &'static str {
            "picky"
        }

        fn run(&mut self, input: &Tensor) -> Result<RawOutput> {
            self.runs += 1;
            if input.layout == self.accepts.0 && input.dtype() == self.accepts.1 {
                Ok(vec![NamedTensor::new("output", vec![1, 0, 85], vec![])])
            } else {
                Err(anyhow!("shape mismatch"))
            }
        }
    }

    struct BrokenBackend;

    impl InferenceBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn run(&mut self, _input: &Tensor) -> Result<RawOutput> {
            Err(anyhow!("model cannot run at all"))
        }
    }

    #[test]
    fn declared_contract_is_tried_first() {
        let backend = PickyBackend {
            accepts: (TensorLayout::Nchw, TensorDtype::F32),
            runs: 0,
        };
        let model = negotiate(
            Box::new(backend),
            declared(TensorLayout::Nchw, TensorDtype::F32),
        )
        .unwrap();
        assert_eq!(model.contract().layout, TensorLayout::Nchw);
    }

    #[test]
    fn layout_flip_is_adopted_when_declaration_lies() {
        let backend = PickyBackend {
            accepts: (TensorLayout::Nhwc, TensorDtype::F32),
            runs: 0,
        };
        let model = negotiate(
            Box::new(backend),
            declared(TensorLayout::Nchw, TensorDtype::F32),
        )
        .unwrap();
        assert_eq!(model.contract().layout, TensorLayout::Nhwc);
    }

    #[test]
    fn f16_declaration_falls_back_to_f32() {
        let backend = PickyBackend {
            accepts: (TensorLayout::Nchw, TensorDtype::F32),
            runs: 0,
        };
        let model = negotiate(
            Box::new(backend),
            declared(TensorLayout::Nchw, TensorDtype::F16),
        )
        .unwrap();
        assert_eq!(model.contract().dtype, TensorDtype::F32);
        assert_eq!(model.contract().layout, TensorLayout::Nchw);
    }

    #[test]
    fn exhausted_ladder_is_fatal() {
        let result = negotiate(
            Box::new(BrokenBackend),
            declared(TensorLayout::Nchw, TensorDtype::F32),
        );
        assert!(result.is_err());
    }
}
