//! Fixed-shape input tensors for the inference invoker.
//!
//! A tensor is created fresh per inference call and discarded after invocation.
//! Batch size is always 1; layout and element type come from the model contract.

use half::f16;
use serde::Deserialize;

/// Memory order of the channel dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, channels, height, width]`
    Nchw,
    /// `[1, height, width, channels]`
    Nhwc,
}

/// Element type of the tensor buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDtype {
    F32,
    F16,
}

/// Tensor payload. The f16 variant is produced by narrowing an f32 buffer.
#[derive(Clone, Debug)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
}

/// A `{batch=1, height, width, channels}` numeric buffer in the layout the
/// loaded model expects.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub layout: TensorLayout,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: TensorData,
}

impl Tensor {
    /// Wrap an f32 buffer already laid out per `layout`, narrowing to f16
    /// when the model demands it.
    pub fn from_f32(
        values: Vec<f32>,
        layout: TensorLayout,
        height: usize,
        width: usize,
        channels: usize,
        dtype: TensorDtype,
    ) -> Self {
        let data = match dtype {
            TensorDtype::F32 => TensorData::F32(values),
            TensorDtype::F16 => TensorData::F16(narrow_to_f16(&values)),
        };
        Self {
            layout,
            height,
            width,
            channels,
            data,
        }
    }

    /// Zero-filled tensor of the exact expected shape, used for warm-up.
    pub fn zeros(
        layout: TensorLayout,
        height: usize,
        width: usize,
        channels: usize,
        dtype: TensorDtype,
    ) -> Self {
        let len = height * width * channels;
        Self::from_f32(vec![0.0; len], layout, height, width, channels, dtype)
    }

    /// Shape in the tensor's own memory order, batch dimension included.
    pub fn shape(&self) -> [usize; 4] {
        match self.layout {
            TensorLayout::Nchw => [1, self.channels, self.height, self.width],
            TensorLayout::Nhwc => [1, self.height, self.width, self.channels],
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> TensorDtype {
        match &self.data {
            TensorData::F32(_) => TensorDtype::F32,
            TensorData::F16(_) => TensorDtype::F16,
        }
    }

    /// Borrow the f32 buffer, if this tensor holds one.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::F16(_) => None,
        }
    }
}

/// Narrow an f32 buffer to f16 with round-to-nearest.
///
/// Non-finite inputs are pinned instead of propagating garbage bits: NaN maps
/// to zero, infinities keep their sign.
pub fn narrow_to_f16(values: &[f32]) -> Vec<f16> {
    values.iter().map(|&v| f16_from_f32(v)).collect()
}

fn f16_from_f32(value: f32) -> f16 {
    if value.is_nan() {
        f16::ZERO
    } else if value.is_infinite() {
        if value > 0.0 {
            f16::INFINITY
        } else {
            f16::NEG_INFINITY
        }
    } else {
        f16::from_f32(value)
    }
}
