use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};

use super::{abort_on_fatal, session_keys};
use crate::planner::StrategyPlanner;
use crate::specialists::CaseContext;

pub struct PlanStrategyTask {
    planner: Arc<StrategyPlanner>,
}

impl PlanStrategyTask {
    pub fn new(planner: Arc<StrategyPlanner>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl Task for PlanStrategyTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case: CaseContext = context.require(session_keys::CASE_CONTEXT).await?;

        let plan = match self.planner.plan(&case).await {
            Ok(plan) => plan,
            Err(e) => return Err(abort_on_fatal(&context, "strategy planning", e).await),
        };

        let status = format!(
            "{} specialist(s) instructed{}",
            plan.instructions.len(),
            if plan.fallback { " (fallback plan)" } else { "" }
        );
        context.set(session_keys::STRATEGY_PLAN, &plan).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status),
        ))
    }
}
