//! Frame decoding and preprocessing.
//!
//! Converts a raw RGB frame into the fixed-shape tensor the loaded model
//! expects: direct stretch resize (no letterbox, so normalized output
//! coordinates map straight back onto the full original frame), per-channel
//! scaling into `[0,1]`, and layout packing.

use anyhow::{anyhow, Result};

use crate::detect::contract::ModelContract;
use crate::frame::Frame;
use crate::tensor::{Tensor, TensorLayout};

/// Prepare a frame for inference.
///
/// Returns `Ok(None)` when the frame has no readable spatial dimensions; the
/// caller must skip such frames without treating them as errors. A frame whose
/// pixel buffer disagrees with its declared dimensions is an error.
pub fn prepare(frame: &Frame, contract: &ModelContract) -> Result<Option<Tensor>> {
    if frame.width == 0 || frame.height == 0 {
        return Ok(None);
    }

    let expected = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if frame.pixels.len() != expected {
        return Err(anyhow!(
            "frame {}: expected {} RGB bytes, got {}",
            frame.id,
            expected,
            frame.pixels.len()
        ));
    }

    let dst_w = contract.input_width as usize;
    let dst_h = contract.input_height as usize;
    let resized = resize_stretch(
        &frame.pixels,
        frame.width as usize,
        frame.height as usize,
        dst_w,
        dst_h,
    );

    let values = match contract.layout {
        TensorLayout::Nhwc => resized.iter().map(|&v| v as f32 / 255.0).collect(),
        TensorLayout::Nchw => {
            let mut out = vec![0.0f32; dst_w * dst_h * 3];
            let plane = dst_w * dst_h;
            for y in 0..dst_h {
                for x in 0..dst_w {
                    let src = (y * dst_w + x) * 3;
                    for c in 0..3 {
                        out[c * plane + y * dst_w + x] = resized[src + c] as f32 / 255.0;
                    }
                }
            }
            out
        }
    };

    Ok(Some(Tensor::from_f32(
        values,
        contract.layout,
        dst_h,
        dst_w,
        3,
        contract.dtype,
    )))
}

/// Bilinear stretch resize of an RGB24 buffer. Aspect ratio is not preserved.
fn resize_stretch(
    pixels: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return pixels.to_vec();
    }

    let mut out = vec![0u8; dst_w * dst_h * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        // Half-pixel centers keep the stretch symmetric at the borders.
        let sy = ((dy as f32 + 0.5) * y_ratio - 0.5).max(0.0);
        let y0 = (sy as usize).min(src_h - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = sy - y0 as f32;

        for dx in 0..dst_w {
            let sx = ((dx as f32 + 0.5) * x_ratio - 0.5).max(0.0);
            let x0 = (sx as usize).min(src_w - 1);
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = sx - x0 as f32;

            let dst = (dy * dst_w + dx) * 3;
            for c in 0..3 {
                let p00 = pixels[(y0 * src_w + x0) * 3 + c] as f32;
                let p01 = pixels[(y0 * src_w + x1) * 3 + c] as f32;
                let p10 = pixels[(y1 * src_w + x0) * 3 + c] as f32;
                let p11 = pixels[(y1 * src_w + x1) * 3 + c] as f32;
                let top = p00 + (p01 - p00) * fx;
                let bottom = p10 + (p11 - p10) * fx;
                let value = top + (bottom - top) * fy;
                out[dst + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
