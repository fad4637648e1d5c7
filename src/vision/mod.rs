pub mod background;

pub use background::BackgroundSubtractor;

use crate::capture::Frame;
use crate::error::TransformError;

/// Result of running the vision transform on one frame
pub struct TransformResult {
    /// Foreground mask as a Gray8 frame sharing the input's sequence and
    /// capture time
    pub mask: Frame,

    /// Fraction of pixels classified as foreground, 0.0..=1.0
    pub motion_ratio: f32,
}

/// Per-frame vision transform.
///
/// Pure from the pipeline's perspective: the only state it mutates is its
/// own (the learned background model), and the only output is the
/// returned result. Implementations must not hold on to the input frame.
pub trait Transform: Send {
    fn apply(&mut self, frame: &Frame) -> Result<TransformResult, TransformError>;
}
