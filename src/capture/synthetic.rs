//! Synthetic test-pattern source.
//!
//! Produces a paced RGB24 stream with a bright bar sweeping over a flat
//! background, so the background model sees plausible motion. Used by the
//! test suite and by `device = "synthetic"` deployments without camera
//! hardware.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    sequence: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn open(config: &CaptureConfig) -> Self {
        info!(
            "Using synthetic {}x{} source at {} fps",
            config.width, config.height, config.fps
        );
        Self {
            width: config.width,
            height: config.height,
            interval: config.frame_interval(),
            sequence: 0,
            open: true,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::StreamNotStarted);
        }

        // Pace like a real device: one frame per interval
        std::thread::sleep(self.interval);

        self.sequence += 1;
        let timestamp = Instant::now();

        let (width, height) = (self.width as usize, self.height as usize);
        let mut data = vec![32u8; width * height * 3];

        // A four-pixel-wide white bar sweeping left to right
        let bar = (self.sequence as usize * 4) % width.max(1);
        for y in 0..height {
            for x in bar..(bar + 4).min(width) {
                let at = (y * width + x) * 3;
                data[at] = 255;
                data[at + 1] = 255;
                data[at + 2] = 255;
            }
        }

        Ok(Frame {
            data: Bytes::from(data),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.width * 3,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            }),
            timestamp,
            captured_at: SystemTime::now(),
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}
