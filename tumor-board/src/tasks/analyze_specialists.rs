//! Fan-out over the instructed specialists.
//!
//! Analyses share nothing mutable, so they run concurrently on a `JoinSet`,
//! bounded by a semaphore. A permit is held through the configured
//! inter-call delay, which spaces out calls to the generation service.
//! Every analysis resolves before this task returns, even when one of them
//! failed fatally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::{abort_on_fatal, session_keys};
use crate::config::PipelineConfig;
use crate::error::GenerationError;
use crate::planner::StrategyPlan;
use crate::specialists::{CaseContext, SpecialistAssessment, SpecialistPanel};

pub struct AnalyzeSpecialistsTask {
    panel: SpecialistPanel,
    max_concurrent: usize,
    inter_call_delay: Duration,
}

impl AnalyzeSpecialistsTask {
    pub fn new(panel: SpecialistPanel, pipeline: &PipelineConfig) -> Self {
        Self {
            panel,
            max_concurrent: pipeline.max_concurrent_specialists.max(1),
            inter_call_delay: Duration::from_millis(pipeline.inter_call_delay_ms),
        }
    }
}

#[async_trait]
impl Task for AnalyzeSpecialistsTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case: Arc<CaseContext> =
            Arc::new(context.require(session_keys::CASE_CONTEXT).await?);
        let plan: StrategyPlan = context.require(session_keys::STRATEGY_PLAN).await?;
        let roles = plan.instructions.iter().map(|i| i.role).collect::<Vec<_>>();

        info!(
            task_id = %self.id(),
            specialists = roles.len(),
            max_concurrent = self.max_concurrent,
            "running specialist analyses"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut running = JoinSet::new();
        for (slot, instruction) in plan.instructions.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let panel = self.panel.clone();
            let case = case.clone();
            let delay = self.inter_call_delay;
            running.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = panel
                    .analyze(instruction.role, &case, Some(&instruction))
                    .await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (slot, outcome)
            });
        }

        let mut resolved: Vec<Option<SpecialistAssessment>> = vec![None; roles.len()];
        let mut fatal: Option<GenerationError> = None;
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((slot, Ok(assessment))) => resolved[slot] = Some(assessment),
                Ok((slot, Err(e))) => {
                    resolved[slot] = Some(SpecialistAssessment::failed(roles[slot], &e));
                    fatal.get_or_insert(e);
                }
                Err(join_error) => error!(error = %join_error, "specialist analysis task panicked"),
            }
        }

        let assessments = resolved
            .into_iter()
            .zip(&roles)
            .map(|(assessment, role)| {
                assessment.unwrap_or_else(|| {
                    SpecialistAssessment::failed(
                        *role,
                        &GenerationError::Transient("analysis did not complete".to_string()),
                    )
                })
            })
            .collect::<Vec<_>>();

        let failed = assessments.iter().filter(|a| a.is_error()).count();
        info!(
            task_id = %self.id(),
            completed = assessments.len() - failed,
            failed,
            "specialist analyses resolved"
        );
        context
            .set(session_keys::SPECIALIST_ASSESSMENTS, &assessments)
            .await?;

        if let Some(e) = fatal {
            return Err(abort_on_fatal(&context, "specialist analysis", e).await);
        }

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(format!(
                "{} specialist assessment(s), {failed} failed",
                assessments.len()
            )),
        ))
    }
}
