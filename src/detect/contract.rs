//! Model contracts.
//!
//! A contract declares everything the pipeline needs to know about a loaded
//! model: input size, tensor layout, element type, output family, and the
//! label table. The family is resolved once at load time so the output
//! decoder never inspects tensor shapes per frame.

use serde::Deserialize;

use crate::tensor::{TensorDtype, TensorLayout};

/// Anchor box prior (width, height) in input pixels.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Anchor {
    pub width: f32,
    pub height: f32,
}

/// Output family of the loaded model.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModelFamily {
    /// One dense tensor shaped `[1, N, 5+C]`.
    SingleDense { classes: usize },
    /// One tensor per stride level, each `[1, S, S, A, 5+C]`, with a fixed
    /// anchor table indexed by `scale_index * anchors_per_scale + anchor_index`.
    MultiScaleGrid {
        classes: usize,
        strides: Vec<u32>,
        anchors: Vec<Anchor>,
    },
}

impl ModelFamily {
    pub fn classes(&self) -> usize {
        match self {
            ModelFamily::SingleDense { classes } => *classes,
            ModelFamily::MultiScaleGrid { classes, .. } => *classes,
        }
    }
}

/// Declared input/output contract of a model artifact.
///
/// The declared layout and dtype are a starting point: the loader may adopt a
/// different candidate if the declaration disagrees with the artifact's actual
/// runtime behavior (see `detect::loader`).
#[derive(Clone, Debug)]
pub struct ModelContract {
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub dtype: TensorDtype,
    pub family: ModelFamily,
    pub labels: Vec<String>,
}

impl ModelContract {
    /// Resolve a class index to its label, falling back to the raw index when
    /// the table is shorter than the model's class count.
    pub fn label(&self, class_index: usize) -> String {
        self.labels
            .get(class_index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_index))
    }

    /// Anchors for one stride level of a multi-scale model.
    pub fn anchors_for_scale(&self, scale_index: usize) -> &[Anchor] {
        match &self.family {
            ModelFamily::MultiScaleGrid {
                strides, anchors, ..
            } => {
                let per_scale = anchors.len() / strides.len().max(1);
                let start = scale_index * per_scale;
                &anchors[start..start + per_scale]
            }
            ModelFamily::SingleDense { .. } => &[],
        }
    }
}

/// Default anchor table for three-scale models (strides 8/16/32), ordered
/// shallowest scale first.
pub fn default_grid_anchors() -> Vec<Anchor> {
    [
        (10.0, 13.0),
        (16.0, 30.0),
        (33.0, 23.0),
        (30.0, 61.0),
        (62.0, 45.0),
        (59.0, 119.0),
        (116.0, 90.0),
        (156.0, 198.0),
        (373.0, 326.0),
    ]
    .iter()
    .map(|&(width, height)| Anchor { width, height })
    .collect()
}

/// COCO class names, in model output order.
pub fn coco_labels() -> Vec<String> {
    [
        "person",
        "bicycle",
        "car",
        "motorcycle",
        "airplane",
        "bus",
        "train",
        "truck",
        "boat",
        "traffic light",
        "fire hydrant",
        "stop sign",
        "parking meter",
        "bench",
        "bird",
        "cat",
        "dog",
        "horse",
        "sheep",
        "cow",
        "elephant",
        "bear",
        "zebra",
        "giraffe",
        "backpack",
        "umbrella",
        "handbag",
        "tie",
        "suitcase",
        "frisbee",
        "skis",
        "snowboard",
        "sports ball",
        "kite",
        "baseball bat",
        "baseball glove",
        "skateboard",
        "surfboard",
        "tennis racket",
        "bottle",
        "wine glass",
        "cup",
        "fork",
        "knife",
        "spoon",
        "bowl",
        "banana",
        "apple",
        "sandwich",
        "orange",
        "broccoli",
        "carrot",
        "hot dog",
        "pizza",
        "donut",
        "cake",
        "chair",
        "couch",
        "potted plant",
        "bed",
        "dining table",
        "toilet",
        "tv",
        "laptop",
        "mouse",
        "remote",
        "keyboard",
        "cell phone",
        "microwave",
        "oven",
        "toaster",
        "sink",
        "refrigerator",
        "book",
        "clock",
        "vase",
        "scissors",
        "teddy bear",
        "hair drier",
        "toothbrush",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_table_has_eighty_classes() {
        let labels = coco_labels();
        assert_eq!(labels.len(), 80);
        assert_eq!(labels[0], "person");
        assert_eq!(labels[79], "toothbrush");
    }

    #[test]
    fn label_lookup_falls_back_to_index() {
        let contract = ModelContract {
            input_width: 320,
            input_height: 240,
            layout: TensorLayout::Nchw,
            dtype: TensorDtype::F32,
            family: ModelFamily::SingleDense { classes: 80 },
            labels: vec!["person".to_string()],
        };
        assert_eq!(contract.label(0), "person");
        assert_eq!(contract.label(7), "class_7");
    }

    #[test]
    fn anchors_are_partitioned_per_scale() {
        let contract = ModelContract {
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
        };
        let shallow = contract.anchors_for_scale(0);
        assert_eq!(shallow.len(), 3);
        assert_eq!(shallow[0], Anchor { width: 10.0, height: 13.0 });
        let deep = contract.anchors_for_scale(2);
        assert_eq!(deep[2], Anchor { width: 373.0, height: 326.0 });
    }
}
