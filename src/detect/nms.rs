//! Confidence-ordered greedy non-maximum suppression.
//!
//! Suppression is cross-class: a candidate can suppress an overlapping
//! candidate of a different class. This mirrors the upstream policy and is a
//! deliberate simplification, kept so downstream test vectors stay valid.

use crate::detect::decode::CandidateDetection;
use crate::publish::Detection;

/// Intersection-over-union of two axis-aligned boxes. Zero when the ranges
/// fail to overlap on either axis.
pub fn iou(a: &CandidateDetection, b: &CandidateDetection) -> f32 {
    let x_left = a.xmin.max(b.xmin);
    let y_top = a.ymin.max(b.ymin);
    let x_right = a.xmax.min(b.xmax);
    let y_bottom = a.ymax.min(b.ymax);

    if x_right < x_left || y_bottom < y_top {
        return 0.0;
    }

    let intersection = (x_right - x_left) * (y_bottom - y_top);
    let area_a = (a.xmax - a.xmin) * (a.ymax - a.ymin);
    let area_b = (b.xmax - b.xmin) * (b.ymax - b.ymin);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy suppression: keep each candidate, in descending score order, only
/// if its IoU with every already-kept candidate stays at or below
/// `iou_threshold`.
pub fn suppress(mut candidates: Vec<CandidateDetection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<CandidateDetection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }

    kept.into_iter()
        .map(|c| Detection {
            label: c.label,
            score: c.score,
            xmin: c.xmin,
            ymin: c.ymin,
            xmax: c.xmax,
            ymax: c.ymax,
        })
        .collect()
}
