use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::info;

use super::session_keys;
use crate::models::{NormalizedCase, PatientRecord};
use crate::normalize::normalize;

/// Reduces the raw record to the baseline snapshot every later stage reads.
pub struct NormalizeCaseTask;

#[async_trait]
impl Task for NormalizeCaseTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let record: PatientRecord = context.require(session_keys::PATIENT_RECORD).await?;
        let case: NormalizedCase = normalize(&record);

        info!(
            task_id = %self.id(),
            patient_id = ?case.patient_id,
            viable_lesions = case.tumor.lesion_count(),
            notes = case.notes.len(),
            "patient record normalized"
        );

        context.set(session_keys::NORMALIZED_CASE, &case).await?;
        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some("Patient record normalized".to_string()),
        ))
    }
}
