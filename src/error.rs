//! Error kinds for the capture pipeline.
//!
//! `StartupError` is fatal and keeps the frame service from ever being
//! exposed. `CaptureError` and `TransformError` are scoped to a single
//! iteration; the capture loop logs and counts them and keeps going unless
//! the device itself has become unusable. An empty frame slot is not an
//! error at all - it is `None` from the slot and a 503 at the HTTP edge.

use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::PixelFormat;

/// Fatal errors raised before the service is exposed.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no suitable capture device found")]
    NoDevice,

    #[error("failed to open capture device {path}")]
    DeviceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device {path} does not support video capture")]
    NotACaptureDevice { path: String },

    #[error("failed to configure capture device {path}")]
    DeviceConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pixel format {0:?} is not supported for capture")]
    UnsupportedFormat(PixelFormat),

    #[error("capture loop exited within the {0:?} startup grace period")]
    CaptureLoopDied(Duration),
}

/// A single frame acquisition failed.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to acquire frame from device")]
    Acquire(#[from] std::io::Error),

    #[error("capture stream is not running")]
    StreamNotStarted,

    #[error("capture device disconnected")]
    Disconnected,
}

impl CaptureError {
    /// Whether the error means the device is gone for good. Transient
    /// failures are retried up to the configured consecutive-failure
    /// budget; fatal ones stop the loop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::Disconnected | CaptureError::StreamNotStarted
        )
    }
}

/// The vision transform (or the decode feeding it) failed on one frame.
/// The frame is dropped; the previously published frame stays visible.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode jpeg frame")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("frame buffer of {len} byte(s) is truncated for {width}x{height} {format:?}")]
    Truncated {
        len: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("pixel format {0:?} is not supported by the transform stage")]
    UnsupportedFormat(PixelFormat),

    #[error("frame is {width}x{height} but the background model is {model_width}x{model_height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        model_width: u32,
        model_height: u32,
    },
}
