//! Pipeline configuration.
//!
//! Configuration comes from an optional JSON file named by `PEERVISION_CONFIG`,
//! with `PEERVISION_*` environment overrides applied on top and defaults for
//! everything else. Thresholds live in their own copyable struct because the
//! scheduler snapshots them per dequeued frame.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::contract::{coco_labels, default_grid_anchors, ModelContract, ModelFamily};
use crate::tensor::{TensorDtype, TensorLayout};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.1;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_QUEUE_SIZE: usize = 3;
const DEFAULT_INPUT_WIDTH: u32 = 320;
const DEFAULT_INPUT_HEIGHT: u32 = 240;
const DEFAULT_GRID_STRIDES: [u32; 3] = [8, 16, 32];
const DEFAULT_SOURCE_FPS: u32 = 15;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    max_queue_size: Option<usize>,
    model: Option<ModelConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<TensorLayout>,
    dtype: Option<TensorDtype>,
    family: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Runtime-tunable decode/suppression thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum `objectness * class-probability` to retain a candidate.
    pub confidence: f32,
    /// IoU above which a lower-scored overlapping box is suppressed.
    pub nms: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            nms: DEFAULT_NMS_THRESHOLD,
        }
    }
}

/// Synthetic/transport source settings.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
        }
    }
}

/// Full pipeline configuration passed to the scheduler at construction.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub thresholds: Thresholds,
    pub max_queue_size: usize,
    pub model_path: Option<PathBuf>,
    pub contract: ModelContract,
    pub source: SourceSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            model_path: None,
            contract: default_contract(),
            source: SourceSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PEERVISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let model = file.model.unwrap_or_default();
        let input_width = model.input_width.unwrap_or(DEFAULT_INPUT_WIDTH);
        let input_height = model.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT);

        let family = match model.family.as_deref() {
            None | Some("single_dense") => ModelFamily::SingleDense { classes: 80 },
            Some("multi_scale_grid") => ModelFamily::MultiScaleGrid {
                classes: 80,
                strides: DEFAULT_GRID_STRIDES.to_vec(),
                anchors: default_grid_anchors(),
            },
            Some(other) => {
                return Err(anyhow!(
                    "unknown model family '{}' (expected single_dense or multi_scale_grid)",
                    other
                ))
            }
        };

        let contract = ModelContract {
            input_width,
            input_height,
            layout: model.layout.unwrap_or(TensorLayout::Nchw),
            dtype: model.dtype.unwrap_or(TensorDtype::F32),
            family,
            labels: coco_labels(),
        };

        let source = file.source.unwrap_or_default();

        Ok(Self {
            thresholds: Thresholds {
                confidence: file
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                nms: file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            },
            max_queue_size: file.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
            model_path: model.path,
            contract,
            source: SourceSettings {
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("PEERVISION_CONFIDENCE_THRESHOLD") {
            self.thresholds.confidence = value
                .parse()
                .map_err(|_| anyhow!("PEERVISION_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("PEERVISION_NMS_THRESHOLD") {
            self.thresholds.nms = value
                .parse()
                .map_err(|_| anyhow!("PEERVISION_NMS_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("PEERVISION_MAX_QUEUE_SIZE") {
            self.max_queue_size = value
                .parse()
                .map_err(|_| anyhow!("PEERVISION_MAX_QUEUE_SIZE must be an integer"))?;
        }
        if let Ok(path) = std::env::var("PEERVISION_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.thresholds.confidence) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.thresholds.nms) {
            return Err(anyhow!("nms_threshold must be within [0, 1]"));
        }
        if self.max_queue_size == 0 {
            return Err(anyhow!("max_queue_size must be at least 1"));
        }
        if self.contract.input_width == 0 || self.contract.input_height == 0 {
            return Err(anyhow!("model input dimensions must be non-zero"));
        }
        if let ModelFamily::MultiScaleGrid {
            strides, anchors, ..
        } = &self.contract.family
        {
            if strides.is_empty() || anchors.len() % strides.len() != 0 {
                return Err(anyhow!(
                    "anchor table ({}) must partition evenly across strides ({})",
                    anchors.len(),
                    strides.len()
                ));
            }
            for &stride in strides {
                if stride == 0
                    || self.contract.input_width % stride != 0
                    || self.contract.input_height % stride != 0
                {
                    return Err(anyhow!(
                        "stride {} does not divide input {}x{}",
                        stride,
                        self.contract.input_width,
                        self.contract.input_height
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_contract() -> ModelContract {
    ModelContract {
        input_width: DEFAULT_INPUT_WIDTH,
        input_height: DEFAULT_INPUT_HEIGHT,
        layout: TensorLayout::Nchw,
        dtype: TensorDtype::F32,
        family: ModelFamily::SingleDense { classes: 80 },
        labels: coco_labels(),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
