use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across tasks without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture instant for age and latency tracking
    pub timestamp: Instant,

    /// Wall-clock capture time; callers compare this to tell a fresh
    /// frame from a stale one
    pub captured_at: SystemTime,
}

impl Frame {
    /// Time elapsed since this frame was captured
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
    Yuyv4,
    Mjpeg,
}
