use tokio::sync::watch;
use tracing::info;

use crate::error::PipelineError;

/// Run state observed by the Task Reader. There is deliberately no
/// `StoppingAfterCurrent` variant — stop-after-current is honoured at
/// pipeline boundaries (by whoever owns the Input channel), not here,
/// because the core must keep consuming blocks to let upstream drain
/// cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Terminated,
}

/// Cooperative pause/terminate signal observed between blocks.
pub struct TaskReader {
    state: watch::Receiver<RunState>,
}

impl TaskReader {
    pub fn new(state: watch::Receiver<RunState>) -> Self {
        Self { state }
    }

    /// Resolves immediately while `Running`; blocks while `Paused`;
    /// returns `Err(PipelineError::Terminated)` once `Terminated` is
    /// observed (including if the controller is dropped mid-pause).
    pub async fn progress(&mut self) -> Result<(), PipelineError> {
        loop {
            let state = *self.state.borrow_and_update();
            match state {
                RunState::Running => return Ok(()),
                RunState::Terminated => return Err(PipelineError::Terminated),
                RunState::Paused => {}
            }
            if self.state.changed().await.is_err() {
                return Err(PipelineError::Terminated);
            }
        }
    }
}

/// The counterpart handle used to drive a `TaskReader` from outside the
/// pipeline loop (a CLI's signal handler, a test harness, ...).
pub struct TaskController {
    sender: watch::Sender<RunState>,
}

impl TaskController {
    pub fn new(initial: RunState) -> (Self, TaskReader) {
        let (tx, rx) = watch::channel(initial);
        (Self { sender: tx }, TaskReader::new(rx))
    }

    pub fn pause(&self) {
        let _ = self.sender.send(RunState::Paused);
    }

    pub fn resume(&self) {
        let _ = self.sender.send(RunState::Running);
    }

    pub fn terminate(&self) {
        info!("task reader: terminate requested");
        let _ = self.sender.send(RunState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn running_resolves_immediately() {
        let (_controller, mut reader) = TaskController::new(RunState::Running);
        reader.progress().await.unwrap();
    }

    #[tokio::test]
    async fn paused_then_resumed_unblocks() {
        let (controller, mut reader) = TaskController::new(RunState::Paused);
        let handle = tokio::spawn(async move {
            reader.progress().await.unwrap();
        });
        tokio::task::yield_now().await;
        controller.resume();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn terminated_surfaces_as_error() {
        let (controller, mut reader) = TaskController::new(RunState::Running);
        controller.terminate();
        let err = reader.progress().await.unwrap_err();
        assert!(matches!(err, PipelineError::Terminated));
    }

    #[tokio::test]
    async fn dropped_controller_while_paused_terminates() {
        let (controller, mut reader) = TaskController::new(RunState::Paused);
        drop(controller);
        let err = reader.progress().await.unwrap_err();
        assert!(matches!(err, PipelineError::Terminated));
    }
}
