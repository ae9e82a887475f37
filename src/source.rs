//! Frame sources.
//!
//! The real system feeds the scheduler from a peer-to-peer video transport;
//! that layer is an external collaborator. `FrameSource` is the seam it plugs
//! into, and `SyntheticSource` is the stub implementation the daemon and
//! tests run against: a gradient scene with a bright square orbiting it, so a
//! real model pointed at the stream has something to find.

use anyhow::Result;

use crate::config::SourceSettings;
use crate::frame::Frame;
use crate::now_millis;

/// Anything that can produce decoded frames with capture timestamps.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Synthetic frame generator.
pub struct SyntheticSource {
    settings: SourceSettings,
    frames_produced: u64,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        log::info!(
            "synthetic source: {}x{} @ {} fps",
            settings.width,
            settings.height,
            settings.target_fps
        );
        Self {
            settings,
            frames_produced: 0,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.settings.width as usize;
        let h = self.settings.height as usize;
        let mut pixels = vec![0u8; w * h * 3];

        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                pixels[offset] = (x * 255 / w.max(1)) as u8;
                pixels[offset + 1] = (y * 255 / h.max(1)) as u8;
                pixels[offset + 2] = 64;
            }
        }

        // A bright square stepping across the scene, one step per frame.
        let square = (w.min(h) / 8).max(1);
        let steps = (w - square).max(1);
        let left = (self.frames_produced as usize * 7) % steps;
        let top = h / 2 - square / 2;
        for y in top..(top + square).min(h) {
            for x in left..(left + square).min(w) {
                let offset = (y * w + x) * 3;
                pixels[offset] = 255;
                pixels[offset + 1] = 255;
                pixels[offset + 2] = 255;
            }
        }

        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame> {
        let pixels = self.generate_pixels();
        let frame = Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            now_millis(),
        );
        self.frames_produced += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_dimensions_and_fresh_ids() {
        let mut source = SyntheticSource::new(SourceSettings {
            target_fps: 15,
            width: 64,
            height: 48,
        });

        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.width, 64);
        assert_eq!(a.height, 48);
        assert_eq!(a.pixels.len(), 64 * 48 * 3);
        assert_ne!(a.id, b.id);
        assert!(b.capture_ts >= a.capture_ts);
        assert_eq!(source.frames_produced(), 2);
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = SyntheticSource::new(SourceSettings {
            target_fps: 15,
            width: 64,
            height: 48,
        });
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_ne!(a.pixels, b.pixels);
    }
}
