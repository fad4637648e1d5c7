//! Adaptive background subtraction.
//!
//! Per-pixel running Gaussian on luma: a pixel is foreground when it sits
//! further than a fixed number of standard deviations from its learned
//! mean, unless the brightness-ratio shadow rule reclassifies it. A 3x3
//! morphological open pass removes speckle before the mask is returned.

use std::sync::Arc;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::TransformError;
use crate::vision::{Transform, TransformResult};

/// Model adaptation rate per frame
const LEARNING_RATE: f32 = 0.02;

/// Squared sigma multiplier for the foreground decision (2.5 sigma)
const VAR_THRESHOLD: f32 = 6.25;

/// Variance floor; keeps flat scenes from triggering on sensor noise
const MIN_VARIANCE: f32 = 25.0;

const MAX_VARIANCE: f32 = 5000.0;

/// Variance assigned to every pixel on the first frame
const INITIAL_VARIANCE: f32 = 225.0;

/// A pixel darker than its mean but above this ratio of it is a shadow,
/// not an object
const SHADOW_RATIO: f32 = 0.55;

/// Sizes itself from the first frame it sees; the camera driver has the
/// final word on geometry, not the configuration.
#[derive(Default)]
pub struct BackgroundSubtractor {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    primed: bool,
}

impl BackgroundSubtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn mask_frame(&self, source: &Frame, mask: Vec<u8>) -> Frame {
        Frame {
            data: mask.into(),
            meta: Arc::new(FrameMetadata {
                sequence: source.meta.sequence,
                width: self.width,
                height: self.height,
                stride: self.width,
                format: PixelFormat::Gray8,
                device_timestamp: source.meta.device_timestamp,
            }),
            timestamp: source.timestamp,
            captured_at: source.captured_at,
        }
    }
}

impl Transform for BackgroundSubtractor {
    fn apply(&mut self, frame: &Frame) -> Result<TransformResult, TransformError> {
        if frame.meta.format != PixelFormat::Rgb24 {
            return Err(TransformError::UnsupportedFormat(frame.meta.format));
        }
        if self.primed && (frame.meta.width != self.width || frame.meta.height != self.height) {
            return Err(TransformError::GeometryMismatch {
                width: frame.meta.width,
                height: frame.meta.height,
                model_width: self.width,
                model_height: self.height,
            });
        }

        let pixels = frame.meta.width as usize * frame.meta.height as usize;
        let expected = pixels * 3;
        if frame.data.len() < expected {
            return Err(TransformError::Truncated {
                len: frame.data.len(),
                width: frame.meta.width,
                height: frame.meta.height,
                format: PixelFormat::Rgb24,
            });
        }

        if !self.primed {
            self.width = frame.meta.width;
            self.height = frame.meta.height;
            self.mean = frame.data[..expected].chunks_exact(3).map(luma).collect();
            self.variance = vec![INITIAL_VARIANCE; pixels];
            self.primed = true;
            return Ok(TransformResult {
                mask: self.mask_frame(frame, vec![0u8; pixels]),
                motion_ratio: 0.0,
            });
        }

        let mut mask = vec![0u8; pixels];
        for (i, rgb) in frame.data[..expected].chunks_exact(3).enumerate() {
            let luma = luma(rgb);
            let mean = self.mean[i];
            let variance = self.variance[i].max(MIN_VARIANCE);
            let diff = luma - mean;

            let beyond_model = diff * diff > VAR_THRESHOLD * variance;
            let shadow = luma < mean && luma > mean * SHADOW_RATIO;
            if beyond_model && !shadow {
                mask[i] = 255;
            }

            self.mean[i] = mean + LEARNING_RATE * diff;
            self.variance[i] =
                (variance + LEARNING_RATE * (diff * diff - variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }

        let mask = open_3x3(&mask, self.width as usize, self.height as usize);
        let foreground = mask.iter().filter(|&&p| p != 0).count();

        Ok(TransformResult {
            mask: self.mask_frame(frame, mask),
            motion_ratio: foreground as f32 / pixels as f32,
        })
    }
}

fn luma(rgb: &[u8]) -> f32 {
    ((77 * u32::from(rgb[0]) + 150 * u32::from(rgb[1]) + 29 * u32::from(rgb[2])) >> 8) as f32
}

// Erode then dilate with a 3x3 kernel; out-of-bounds counts as background
fn open_3x3(mask: &[u8], width: usize, height: usize) -> Vec<u8> {
    let eroded = morph_3x3(mask, width, height, true);
    morph_3x3(&eroded, width, height, false)
}

fn morph_3x3(mask: &[u8], width: usize, height: usize, erode: bool) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];
    for y in 0..height {
        for x in 0..width {
            let mut all = true;
            let mut any = false;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    let set = nx >= 0
                        && ny >= 0
                        && nx < width as i64
                        && ny < height as i64
                        && mask[ny as usize * width + nx as usize] != 0;
                    all &= set;
                    any |= set;
                }
            }
            if if erode { all } else { any } {
                out[y * width + x] = 255;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::{Instant, SystemTime};

    use super::*;

    const W: u32 = 32;
    const H: u32 = 32;

    fn rgb_frame(sequence: u64, fill: u8) -> Frame {
        frame_with(sequence, vec![fill; (W * H * 3) as usize])
    }

    fn frame_with(sequence: u64, data: Vec<u8>) -> Frame {
        Frame {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: W,
                height: H,
                stride: W * 3,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
        }
    }

    fn primed_model(fill: u8) -> BackgroundSubtractor {
        let mut model = BackgroundSubtractor::new();
        for sequence in 0..10 {
            model.apply(&rgb_frame(sequence, fill)).unwrap();
        }
        model
    }

    #[test]
    fn static_scene_produces_no_motion() {
        let mut model = primed_model(64);
        let result = model.apply(&rgb_frame(10, 64)).unwrap();
        assert_eq!(result.motion_ratio, 0.0);
        assert!(result.mask.data.iter().all(|&p| p == 0));
        assert_eq!(result.mask.meta.format, PixelFormat::Gray8);
        assert_eq!(result.mask.meta.sequence, 10);
    }

    #[test]
    fn inserted_object_is_flagged_as_foreground() {
        let mut model = primed_model(32);

        // Drop a bright 8x8 block into an otherwise unchanged scene
        let mut data = vec![32u8; (W * H * 3) as usize];
        for y in 8..16u32 {
            for x in 8..16u32 {
                let at = ((y * W + x) * 3) as usize;
                data[at] = 255;
                data[at + 1] = 255;
                data[at + 2] = 255;
            }
        }
        let result = model.apply(&frame_with(10, data)).unwrap();

        assert!(result.motion_ratio > 0.0);
        let center = (12 * W + 12) as usize;
        assert_eq!(result.mask.data[center], 255);
        // The untouched corner stays background
        assert_eq!(result.mask.data[0], 0);
    }

    #[test]
    fn single_pixel_speckle_is_opened_away() {
        let mut model = primed_model(32);

        let mut data = vec![32u8; (W * H * 3) as usize];
        let at = ((4 * W + 4) * 3) as usize;
        data[at] = 255;
        data[at + 1] = 255;
        data[at + 2] = 255;
        let result = model.apply(&frame_with(10, data)).unwrap();

        assert_eq!(result.motion_ratio, 0.0);
    }

    #[test]
    fn shadows_are_not_foreground() {
        let mut model = primed_model(200);

        // Uniform dimming to 70% reads as shadow, not an object
        let result = model.apply(&rgb_frame(10, 140)).unwrap();
        assert_eq!(result.motion_ratio, 0.0);
    }

    #[test]
    fn geometry_change_after_priming_is_rejected() {
        let mut model = primed_model(10);
        let mut frame = rgb_frame(10, 10);
        let mut meta = (*frame.meta).clone();
        meta.width = W * 2;
        frame.meta = Arc::new(meta);
        assert!(matches!(
            model.apply(&frame),
            Err(TransformError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn non_rgb_input_is_rejected() {
        let mut model = BackgroundSubtractor::new();
        let mut frame = rgb_frame(0, 10);
        let mut meta = (*frame.meta).clone();
        meta.format = PixelFormat::Mjpeg;
        frame.meta = Arc::new(meta);
        assert!(matches!(
            model.apply(&frame),
            Err(TransformError::UnsupportedFormat(PixelFormat::Mjpeg))
        ));
    }
}
