use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};

use super::{abort_on_fatal, session_keys};
use crate::consensus::ConsensusSynthesizer;
use crate::planner::StrategyPlan;
use crate::specialists::{CaseContext, SpecialistAssessment};

pub struct SynthesizeConsensusTask {
    synthesizer: Arc<ConsensusSynthesizer>,
}

impl SynthesizeConsensusTask {
    pub fn new(synthesizer: Arc<ConsensusSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl Task for SynthesizeConsensusTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case: CaseContext = context.require(session_keys::CASE_CONTEXT).await?;
        let plan: StrategyPlan = context.require(session_keys::STRATEGY_PLAN).await?;
        let assessments: Vec<SpecialistAssessment> =
            context.require(session_keys::SPECIALIST_ASSESSMENTS).await?;

        let recommendation = match self.synthesizer.synthesize(&case, &plan, assessments).await {
            Ok(recommendation) => recommendation,
            Err(e) => return Err(abort_on_fatal(&context, "consensus synthesis", e).await),
        };

        let status = format!("Consensus {}", recommendation.status);
        context
            .set(session_keys::RECOMMENDATION, &recommendation)
            .await?;

        Ok(TaskResult::new_with_status(
            Some(recommendation.consensus_text.clone()),
            NextAction::End,
            Some(status),
        ))
    }
}
