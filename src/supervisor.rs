//! Startup supervision.
//!
//! The capture loop is launched first; only after it has survived a fixed
//! grace period does the service count as ready and may the HTTP listener
//! be bound. A broken capture pipeline must never appear available.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capture::FrameSource;
use crate::error::StartupError;
use crate::pipeline::capture_loop::LoopOptions;
use crate::pipeline::{CaptureLoop, FrameSlot};
use crate::vision::Transform;

/// Where the service is in its lifecycle. `Ready` and `Failed` are
/// terminal: the supervisor runs exactly once, before exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Launching,
    Ready,
    Failed,
}

pub struct Supervisor {
    grace: Duration,
    state: ServiceState,
}

/// Handles to a launched capture pipeline: the slot the loop publishes
/// into, the task whose liveness is the health signal, and the
/// cancellation side of the loop's shutdown path.
pub struct RunningService {
    slot: Arc<FrameSlot>,
    capture_task: Arc<JoinHandle<()>>,
    cancel: watch::Sender<bool>,
}

impl RunningService {
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn capture_task(&self) -> Arc<JoinHandle<()>> {
        Arc::clone(&self.capture_task)
    }

    pub fn is_capture_alive(&self) -> bool {
        !self.capture_task.is_finished()
    }

    /// Flip the cancellation signal and wait, bounded, for the loop to
    /// release the device and exit.
    pub async fn shutdown(self, within: Duration) {
        info!("Stopping capture loop");
        let _ = self.cancel.send(true);

        let deadline = tokio::time::Instant::now() + within;
        while !self.capture_task.is_finished() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if !self.capture_task.is_finished() {
            warn!("Capture loop did not stop within {:?}", within);
        }
    }
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            state: ServiceState::NotStarted,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Open the source, start the capture loop, and verify it survives
    /// the grace period. On any failure the service ends up `Failed` and
    /// the caller must not expose the frame service.
    pub async fn launch<F>(
        &mut self,
        open: F,
        transform: Box<dyn Transform>,
        options: LoopOptions,
    ) -> Result<RunningService, StartupError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, StartupError>,
    {
        self.state = ServiceState::Launching;
        info!("Launching capture loop");

        let source = match open() {
            Ok(source) => source,
            Err(e) => {
                self.state = ServiceState::Failed;
                error!("Capture startup failed: {e}");
                return Err(e);
            }
        };

        let slot = Arc::new(FrameSlot::new());
        let (cancel, cancel_rx) = watch::channel(false);
        let task = CaptureLoop::new(source, transform, Arc::clone(&slot), options, cancel_rx).spawn();

        tokio::time::sleep(self.grace).await;

        if task.is_finished() {
            self.state = ServiceState::Failed;
            error!("Capture loop died within the {:?} grace period", self.grace);
            return Err(StartupError::CaptureLoopDied(self.grace));
        }

        self.state = ServiceState::Ready;
        info!("Capture loop alive after {:?}, service ready", self.grace);
        Ok(RunningService {
            slot,
            capture_task: Arc::new(task),
            cancel,
        })
    }
}
