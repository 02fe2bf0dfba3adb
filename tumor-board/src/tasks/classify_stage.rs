use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::info;

use super::session_keys;
use crate::models::NormalizedCase;
use crate::specialists::CaseContext;
use crate::staging::classify;

pub struct ClassifyStageTask;

#[async_trait]
impl Task for ClassifyStageTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case: NormalizedCase = context.require(session_keys::NORMALIZED_CASE).await?;
        let staging = classify(&case.clinical, &case.tumor, &case.pathology);

        info!(
            task_id = %self.id(),
            stage = %staging.stage,
            intent = %staging.treatment_intent,
            warnings = staging.data_quality_warnings.len(),
            "stage classified"
        );

        let status = format!("BCLC {} ({})", staging.stage, staging.label);
        context.set(session_keys::STAGING_RESULT, &staging).await?;
        context
            .set(session_keys::CASE_CONTEXT, CaseContext::new(case, staging))
            .await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status),
        ))
    }
}
