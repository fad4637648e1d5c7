//! V4L2 capture source with memory-mapped streaming

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tracing::info;
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::error::{CaptureError, StartupError};
use crate::utils;
use crate::CaptureConfig;

/// V4L2 capture device, exclusively owned by the capture loop. The
/// stream keeps the device handle alive; dropping the stream on close
/// releases it.
pub struct V4l2Source {
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
}

impl V4l2Source {
    /// Open and configure the device, then start streaming. Any failure
    /// here is fatal: the capture loop never starts on a device we could
    /// not fully negotiate.
    pub fn open(config: &CaptureConfig) -> Result<Self, StartupError> {
        let (path, format) = if config.device == "auto" {
            let found = utils::auto_detect_device()?;
            (found.path, found.format)
        } else {
            (config.device.clone(), config.format)
        };

        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(&path).map_err(|source| StartupError::DeviceOpen {
            path: path.clone(),
            source,
        })?;

        let caps = device
            .query_caps()
            .map_err(|source| StartupError::DeviceOpen {
                path: path.clone(),
                source,
            })?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(StartupError::NotACaptureDevice { path });
        }

        let config_err = |source| StartupError::DeviceConfig {
            path: path.clone(),
            source,
        };

        // Negotiate geometry and pixel format; the driver may adjust both
        let mut fmt = device.format().map_err(config_err)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => return Err(StartupError::UnsupportedFormat(other)),
        };
        let fmt = device.set_format(&fmt).map_err(config_err)?;

        // Pin the frame rate so the loop paces at the configured interval
        let params = device
            .set_params(&Parameters::with_fps(config.fps))
            .map_err(config_err)?;
        info!(
            "Negotiated {}x{} {} at {}/{} fps",
            fmt.width,
            fmt.height,
            fmt.fourcc,
            params.interval.denominator,
            params.interval.numerator
        );

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(config_err)?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        Ok(Self {
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            format,
            sequence: 0,
        })
    }

    /// Geometry the driver actually granted
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let stream = self.stream.as_mut().ok_or(CaptureError::StreamNotStarted)?;

        // Blocks until the driver hands over the next buffer, bounded by
        // the negotiated frame interval
        let (buf, meta) = stream.next()?;

        let used = meta.bytesused as usize;
        let data = if used > 0 && used <= buf.len() {
            Bytes::copy_from_slice(&buf[..used])
        } else {
            Bytes::copy_from_slice(buf)
        };

        self.sequence += 1;

        let stride = match self.format {
            PixelFormat::Yuyv4 => self.width * 2,
            _ => self.width,
        };

        Ok(Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride,
                format: self.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            timestamp,
            captured_at: SystemTime::now(),
        })
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stream stopped");
        }
    }
}
