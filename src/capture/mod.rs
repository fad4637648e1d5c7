pub mod decoder;
pub mod frame;
pub mod synthetic;
pub mod v4l2;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

use crate::error::{CaptureError, StartupError};
use crate::CaptureConfig;

/// A configured capture device yielding frames at its own pace.
///
/// Opening and configuring the device happens in the concrete
/// constructors and is fatal on failure. `next_frame` blocks until the
/// device yields the next frame, bounded by the configured frame
/// interval. The capture loop owns the source for its whole lifetime and
/// calls `close` exactly once on the way out.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
    fn close(&mut self);
}

/// Pick the concrete source for the configured device.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, StartupError> {
    match config.device.as_str() {
        "synthetic" => Ok(Box::new(SyntheticSource::open(config))),
        _ => Ok(Box::new(V4l2Source::open(config)?)),
    }
}
