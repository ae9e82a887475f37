//! Model output decoding.
//!
//! Turns raw output tensors into candidate detections with normalized corner
//! coordinates, before suppression. The decode strategy is selected once at
//! load time through the contract's family tag; nothing here inspects tensor
//! shapes per frame beyond validating them.

use anyhow::{anyhow, Result};

use crate::detect::backend::{NamedTensor, RawOutput};
use crate::detect::contract::{ModelContract, ModelFamily};

/// Objectness floor applied on the multi-scale path before the per-class
/// scan. Coarser than the confidence threshold on purpose: it bounds the
/// inner-loop cost at the price of some recall on low-objectness anchors.
const GRID_OBJECTNESS_CUTOFF: f32 = 0.2;

/// Minimum normalized box width/height on the multi-scale path. Suppresses
/// high-frequency false positives from the shallowest grid.
const MIN_BOX_FRACTION: f32 = 0.02;

/// An unsuppressed detection. Coordinates are normalized to `[0,1]` relative
/// to the model input (and therefore, because preprocessing stretches rather
/// than letterboxes, to the original frame).
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateDetection {
    pub label: String,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode raw output into candidates scoring at least `confidence_threshold`.
pub fn decode(
    raw: &RawOutput,
    contract: &ModelContract,
    confidence_threshold: f32,
) -> Result<Vec<CandidateDetection>> {
    match &contract.family {
        ModelFamily::SingleDense { classes } => {
            let output = raw
                .first()
                .ok_or_else(|| anyhow!("model produced no outputs"))?;
            decode_dense(output, contract, *classes, confidence_threshold)
        }
        ModelFamily::MultiScaleGrid {
            classes, strides, ..
        } => {
            if raw.len() != strides.len() {
                return Err(anyhow!(
                    "expected {} output tensors (one per stride), got {}",
                    strides.len(),
                    raw.len()
                ));
            }
            let mut candidates = Vec::new();
            for (scale_index, (output, &stride)) in raw.iter().zip(strides).enumerate() {
                decode_grid(
                    output,
                    contract,
                    *classes,
                    scale_index,
                    stride,
                    confidence_threshold,
                    &mut candidates,
                )?;
            }
            Ok(candidates)
        }
    }
}

/// Dense family: `[1, N, 5+C]`, box regression in input-pixel center form.
fn decode_dense(
    output: &NamedTensor,
    contract: &ModelContract,
    classes: usize,
    confidence_threshold: f32,
) -> Result<Vec<CandidateDetection>> {
    let row_len = 5 + classes;
    if output.data.len() % row_len != 0 {
        return Err(anyhow!(
            "dense output '{}' length {} is not a multiple of {}",
            output.name,
            output.data.len(),
            row_len
        ));
    }

    let input_w = contract.input_width as f32;
    let input_h = contract.input_height as f32;
    let mut candidates = Vec::new();

    for row in output.data.chunks_exact(row_len) {
        let objectness = sigmoid(row[4]);
        // Confidence is objectness * class score <= objectness, so anchors
        // below the threshold can be rejected before the per-class scan.
        if objectness < confidence_threshold {
            continue;
        }

        let Some((best_class, best_logit)) = argmax(&row[5..]) else {
            continue;
        };
        let confidence = objectness * sigmoid(best_logit);
        if confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        if let Some(candidate) = corner_box(
            cx / input_w,
            cy / input_h,
            w / input_w,
            h / input_h,
            confidence,
            contract.label(best_class),
            None,
        ) {
            candidates.push(candidate);
        }
    }

    Ok(candidates)
}

/// Multi-scale family: one `[1, S, S, A, 5+C]` tensor per stride level.
#[allow(clippy::too_many_arguments)]
fn decode_grid(
    output: &NamedTensor,
    contract: &ModelContract,
    classes: usize,
    scale_index: usize,
    stride: u32,
    confidence_threshold: f32,
    candidates: &mut Vec<CandidateDetection>,
) -> Result<()> {
    let anchors = contract.anchors_for_scale(scale_index);
    if anchors.is_empty() {
        return Err(anyhow!("no anchors for scale {}", scale_index));
    }

    let input_w = contract.input_width as f32;
    let input_h = contract.input_height as f32;
    let grid_w = (contract.input_width / stride) as usize;
    let grid_h = (contract.input_height / stride) as usize;
    let row_len = 5 + classes;
    let expected = grid_w * grid_h * anchors.len() * row_len;
    if output.data.len() != expected {
        return Err(anyhow!(
            "grid output '{}' (stride {}): expected {} values, got {}",
            output.name,
            stride,
            expected,
            output.data.len()
        ));
    }

    let stride = stride as f32;
    for gy in 0..grid_h {
        for gx in 0..grid_w {
            for (a, anchor) in anchors.iter().enumerate() {
                let base = ((gy * grid_w + gx) * anchors.len() + a) * row_len;
                let row = &output.data[base..base + row_len];

                let objectness = sigmoid(row[4]);
                if objectness < GRID_OBJECTNESS_CUTOFF {
                    continue;
                }

                let Some((best_class, best_logit)) = argmax(&row[5..]) else {
                    continue;
                };
                let confidence = objectness * sigmoid(best_logit);
                if confidence < confidence_threshold {
                    continue;
                }

                let cx = (sigmoid(row[0]) + gx as f32) * stride;
                let cy = (sigmoid(row[1]) + gy as f32) * stride;
                let w = row[2].exp() * anchor.width;
                let h = row[3].exp() * anchor.height;

                if let Some(candidate) = corner_box(
                    cx / input_w,
                    cy / input_h,
                    w / input_w,
                    h / input_h,
                    confidence,
                    contract.label(best_class),
                    Some(MIN_BOX_FRACTION),
                ) {
                    candidates.push(candidate);
                }
            }
        }
    }

    Ok(())
}

/// Convert a normalized center-form box to clamped corner form.
///
/// Degenerate boxes are rejected, as are boxes under `min_fraction` in either
/// normalized dimension when a floor is given.
fn corner_box(
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    score: f32,
    label: String,
    min_fraction: Option<f32>,
) -> Option<CandidateDetection> {
    if let Some(floor) = min_fraction {
        if w < floor || h < floor {
            return None;
        }
    }

    let xmin = (cx - w / 2.0).clamp(0.0, 1.0);
    let ymin = (cy - h / 2.0).clamp(0.0, 1.0);
    let xmax = (cx + w / 2.0).clamp(0.0, 1.0);
    let ymax = (cy + h / 2.0).clamp(0.0, 1.0);

    if xmax <= xmin || ymax <= ymin {
        return None;
    }

    Some(CandidateDetection {
        label,
        score,
        xmin,
        ymin,
        xmax,
        ymax,
    })
}

fn argmax(logits: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in logits.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::NamedTensor;
    use crate::detect::contract::{coco_labels, default_grid_anchors, ModelContract, ModelFamily};
    use crate::tensor::{TensorDtype, TensorLayout};

    /// Inverse of sigmoid, for building rows with known decoded scores.
    fn logit(p: f32) -> f32 {
        (p / (1.0 - p)).ln()
    }

    fn dense_contract() -> ModelContract {
        ModelContract {
            input_width: 320,
            input_height: 240,
            layout: TensorLayout::Nchw,
            dtype: TensorDtype::F32,
            family: ModelFamily::SingleDense { classes: 80 },
            labels: coco_labels(),
        }
    }

    fn grid_contract() -> ModelContract {
        ModelContract {
            input_width: 416,
            input_height: 416,
            layout: TensorLayout::Nchw,
            dtype: TensorDtype::F32,
            family: ModelFamily::MultiScaleGrid {
                classes: 80,
                strides: vec![8, 16, 32],
                anchors: default_grid_anchors(),
            },
            labels: coco_labels(),
        }
    }

    fn dense_row(cx: f32, cy: f32, w: f32, h: f32, obj: f32, class: usize, cls: f32) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h, logit(obj)];
        let mut logits = vec![-20.0; 80];
        logits[class] = logit(cls);
        row.extend(logits);
        row
    }

    #[test]
    fn dense_row_decodes_to_normalized_corners() {
        let contract = dense_contract();
        // Centered box, half the input in each dimension.
        let row = dense_row(160.0, 120.0, 160.0, 120.0, 0.9, 0, 0.9);
        let raw = vec![NamedTensor::new("output", vec![1, 1, 85], row)];

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.label, "person");
        assert!((c.score - 0.81).abs() < 1e-3);
        assert!((c.xmin - 0.25).abs() < 1e-6);
        assert!((c.ymin - 0.25).abs() < 1e-6);
        assert!((c.xmax - 0.75).abs() < 1e-6);
        assert!((c.ymax - 0.75).abs() < 1e-6);
    }

    #[test]
    fn dense_rejects_below_threshold_and_degenerate_boxes() {
        let contract = dense_contract();
        let mut data = dense_row(160.0, 120.0, 160.0, 120.0, 0.3, 2, 0.3); // 0.09 < 0.1
        data.extend(dense_row(160.0, 120.0, 0.0, 120.0, 0.9, 2, 0.9)); // zero width
        let raw = vec![NamedTensor::new("output", vec![1, 2, 85], data)];

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn dense_clamps_boxes_to_unit_square() {
        let contract = dense_contract();
        // Box hanging off the left edge.
        let row = dense_row(10.0, 120.0, 100.0, 100.0, 0.9, 0, 0.9);
        let raw = vec![NamedTensor::new("output", vec![1, 1, 85], row)];

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert_eq!(candidates[0].xmin, 0.0);
        assert!(candidates[0].xmax > 0.0 && candidates[0].xmax <= 1.0);
    }

    #[test]
    fn dense_output_with_bad_row_length_is_an_error() {
        let contract = dense_contract();
        let raw = vec![NamedTensor::new("output", vec![1, 1, 7], vec![0.0; 7])];
        assert!(decode(&raw, &contract, 0.1).is_err());
    }

    #[test]
    fn grid_decodes_center_from_cell_offset_and_stride() {
        let contract = grid_contract();
        let row_len = 85;
        let strides = [8u32, 16, 32];
        let mut raw = Vec::new();

        for &stride in &strides {
            let s = (416 / stride) as usize;
            // -20 everywhere: objectness sigmoid(-20) ~ 0 silences all cells.
            let mut data = vec![-20.0f32; s * s * 3 * row_len];
            if stride == 32 {
                // Cell (6, 6), anchor 0 of the deepest scale (116x90).
                let base = ((6 * s + 6) * 3) * row_len;
                data[base] = 0.0; // sigmoid(0) = 0.5 -> cx = 6.5 * 32 = 208
                data[base + 1] = 0.0;
                data[base + 2] = 0.0; // exp(0) * 116 = 116
                data[base + 3] = 0.0; // exp(0) * 90 = 90
                data[base + 4] = logit(0.9);
                data[base + 5] = logit(0.9);
            }
            raw.push(NamedTensor::new(
                format!("scale_{}", stride),
                vec![1, s, s, 3, row_len],
                data,
            ));
        }

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.label, "person");
        // Center 208/416 = 0.5, width 116/416, height 90/416.
        assert!((c.xmin - (0.5 - 116.0 / 416.0 / 2.0)).abs() < 1e-4);
        assert!((c.ymax - (0.5 + 90.0 / 416.0 / 2.0)).abs() < 1e-4);
    }

    #[test]
    fn grid_applies_minimum_size_floor() {
        let contract = grid_contract();
        let row_len = 85;
        let strides = [8u32, 16, 32];
        let mut raw = Vec::new();

        for &stride in &strides {
            let s = (416 / stride) as usize;
            let mut data = vec![-20.0f32; s * s * 3 * row_len];
            if stride == 8 {
                // Confident but tiny: anchor 10x13 shrunk well below 2% of 416.
                let base = 0;
                data[base + 2] = (0.2f32).ln(); // 2 px wide
                data[base + 3] = (0.2f32).ln();
                data[base + 4] = logit(0.95);
                data[base + 5] = logit(0.95);
            }
            raw.push(NamedTensor::new(
                format!("scale_{}", stride),
                vec![1, s, s, 3, row_len],
                data,
            ));
        }

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn grid_objectness_cutoff_prunes_before_class_scan() {
        let contract = grid_contract();
        let row_len = 85;
        let strides = [8u32, 16, 32];
        let mut raw = Vec::new();

        for &stride in &strides {
            let s = (416 / stride) as usize;
            let mut data = vec![-20.0f32; s * s * 3 * row_len];
            if stride == 16 {
                // Objectness 0.15 with a perfect class score: confidence 0.15
                // would pass the 0.1 threshold, but the coarser objectness
                // cutoff rejects it first.
                let base = 0;
                data[base + 2] = 1.0;
                data[base + 3] = 1.0;
                data[base + 4] = logit(0.15);
                data[base + 5] = 20.0;
            }
            raw.push(NamedTensor::new(
                format!("scale_{}", stride),
                vec![1, s, s, 3, row_len],
                data,
            ));
        }

        let candidates = decode(&raw, &contract, 0.1).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn grid_with_missing_scale_tensor_is_an_error() {
        let contract = grid_contract();
        let raw = vec![NamedTensor::new("only_one", vec![1], vec![0.0])];
        assert!(decode(&raw, &contract, 0.1).is_err());
    }
}
