//! FlowRunner – loads a session, executes graph steps, and persists the
//! updated session back to storage.
//!
//! * [`FlowRunner::run`] executes exactly **one** step (which may itself chain
//!   through several tasks that return `ContinueAndExecute`). Use it for
//!   interactive flows that hand control back between steps.
//! * [`FlowRunner::run_to_completion`] keeps stepping until the graph reports
//!   [`ExecutionStatus::Completed`]. Batch pipelines with no human pauses use
//!   this one.
//!
//! Both save the session after every step, so a failed step leaves the
//! session pointing at the task that failed.

use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{GraphError, Result},
    graph::{ExecutionResult, ExecutionStatus, Graph},
    storage::SessionStorage,
};

/// Upper bound on steps taken by [`FlowRunner::run_to_completion`].
pub const DEFAULT_MAX_STEPS: usize = 64;

/// High-level helper that orchestrates the common _load → execute → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
    max_steps: usize,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            graph,
            storage,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Execute **exactly one** step for the given `session_id` and persist the
    /// updated session.
    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        let outcome = self.graph.execute_session(&mut session).await;
        self.storage.save(session).await?;
        outcome
    }

    /// Step the session until the graph completes or `max_steps` is reached.
    pub async fn run_to_completion(&self, session_id: &str) -> Result<ExecutionResult> {
        for step in 1..=self.max_steps {
            let result = self.run(session_id).await?;
            debug!(session = %session_id, step, status = ?result.status, "flow step finished");
            if result.status == ExecutionStatus::Completed {
                return Ok(result);
            }
        }
        Err(GraphError::StepLimitExceeded(self.max_steps))
    }
}
