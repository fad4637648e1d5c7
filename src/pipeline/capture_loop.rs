//! The capture loop: acquire, transform, publish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capture::{decoder, Frame, FrameSource};
use crate::pipeline::FrameSlot;
use crate::vision::Transform;
use crate::PublishMode;

/// Pause before retrying after a transient capture failure
const RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub publish: PublishMode,
    pub max_consecutive_failures: u32,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            publish: PublishMode::Raw,
            max_consecutive_failures: 30,
        }
    }
}

/// Owns the frame source for its whole lifetime and drives the per-frame
/// cycle until cancelled or the device becomes unusable. The loop's
/// liveness is the health signal the supervisor and /healthz rely on.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    transform: Box<dyn Transform>,
    slot: Arc<FrameSlot>,
    options: LoopOptions,
    cancel: watch::Receiver<bool>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        transform: Box<dyn Transform>,
        slot: Arc<FrameSlot>,
        options: LoopOptions,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            transform,
            slot,
            options,
            cancel,
        }
    }

    /// Run on the blocking pool; device reads block for up to one frame
    /// interval at a time.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }

    fn run(mut self) {
        info!("Capture loop started");
        let mut consecutive_failures = 0u32;

        // Cancellation is checked once per iteration; next_frame blocks
        // for at most one frame interval, which bounds shutdown latency
        while !*self.cancel.borrow() {
            match self.source.next_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    metrics::counter!("frames_captured_total").increment(1);
                    self.process(frame);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    metrics::counter!("capture_failures_total").increment(1);
                    error!("Capture error: {e}");
                    if e.is_fatal() {
                        error!("Capture device unusable, stopping");
                        break;
                    }
                    if consecutive_failures >= self.options.max_consecutive_failures {
                        error!("{consecutive_failures} consecutive capture failures, stopping");
                        break;
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }

        // Mandatory teardown: release the device exactly once, whatever
        // path brought us here
        self.source.close();
        info!("Capture loop stopped");
    }

    fn process(&mut self, frame: Frame) {
        let result = decoder::to_rgb24(&frame).and_then(|rgb| self.transform.apply(&rgb));
        let publish = match result {
            Ok(result) => {
                metrics::gauge!("motion_ratio").set(f64::from(result.motion_ratio));
                match self.options.publish {
                    PublishMode::Raw => frame,
                    PublishMode::Mask => result.mask,
                }
            }
            Err(e) => {
                metrics::counter!("transform_failures_total").increment(1);
                warn!("Transform failed, dropping frame {}: {e}", frame.meta.sequence);
                return;
            }
        };

        self.slot.publish(publish);
        metrics::counter!("frames_published_total").increment(1);
    }
}
