use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use stepgraph_core::error::{Result, StepgraphError};
use stepgraph_core::types::{RunId, RunState, RunStatus, WorkflowRun};

use crate::engine::WorkflowEngine;

/// Runs drivers out-of-band on tokio's blocking pool.
///
/// `start_run` returns the pending record straight away and leaves the run
/// to finish in the background; callers observe progress by polling.
/// Every method that spawns must be called from within a tokio runtime.
#[derive(Clone)]
pub struct RunDispatcher {
    engine: Arc<WorkflowEngine>,
}

impl RunDispatcher {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Create a run and schedule its driver.
    ///
    /// The returned record is the `pending` snapshot taken before the driver
    /// was scheduled.
    pub fn start_run(
        &self,
        graph_id: &str,
        initial_state: RunState,
    ) -> Result<(WorkflowRun, JoinHandle<Result<RunStatus>>)> {
        let run_id = self.engine.create_run(graph_id, initial_state)?;
        let pending = self
            .engine
            .get_run(&run_id)
            .ok_or_else(|| StepgraphError::RunNotFound(run_id.to_string()))?;
        let handle = self.submit(run_id);
        Ok((pending, handle))
    }

    /// Schedule the driver for an existing run.
    pub fn submit(&self, run_id: RunId) -> JoinHandle<Result<RunStatus>> {
        let engine = Arc::clone(&self.engine);
        debug!(run_id = %run_id, "Submitting run to blocking pool");
        tokio::task::spawn_blocking(move || {
            let result = engine.drive(&run_id);
            if let Err(ref e) = result {
                error!(run_id = %run_id, error = %e, "Driver aborted");
            }
            result
        })
    }

    /// Poll until the run reaches `completed` or `failed`.
    ///
    /// `driver` is the handle returned for this run. If it finishes with an
    /// error while the run is still unfinished, that error is returned instead
    /// of polling forever.
    pub async fn wait_for_terminal(
        &self,
        run_id: &RunId,
        driver: JoinHandle<Result<RunStatus>>,
        poll_interval: Duration,
    ) -> Result<WorkflowRun> {
        let mut driver = Some(driver);
        loop {
            let run = self
                .engine
                .get_run(run_id)
                .ok_or_else(|| StepgraphError::RunNotFound(run_id.to_string()))?;
            if run.status.is_terminal() {
                return Ok(run);
            }

            if driver.as_ref().is_some_and(JoinHandle::is_finished) {
                if let Some(handle) = driver.take() {
                    match handle.await {
                        // Re-read: the run may have turned terminal since the poll.
                        Ok(Ok(_)) => continue,
                        Ok(Err(e)) => return Err(e),
                        Err(e) => return Err(StepgraphError::Driver(e.to_string())),
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
