pub mod analyze_specialists;
pub mod classify_stage;
pub mod normalize_case;
pub mod plan_strategy;
pub mod session_keys;
pub mod synthesize_consensus;

pub use analyze_specialists::AnalyzeSpecialistsTask;
pub use classify_stage::ClassifyStageTask;
pub use normalize_case::NormalizeCaseTask;
pub use plan_strategy::PlanStrategyTask;
pub use synthesize_consensus::SynthesizeConsensusTask;

use graph_flow::{Context, GraphError};
use tracing::error;

use crate::error::GenerationError;

/// Record a fatal generation failure for the caller and turn it into a task
/// failure that stops the graph.
pub(crate) async fn abort_on_fatal(context: &Context, stage: &str, e: GenerationError) -> GraphError {
    error!(stage, error = %e, "fatal generation failure, aborting run");
    if let Err(store_err) = context
        .set(session_keys::FATAL_GENERATION_ERROR, &e)
        .await
    {
        error!(error = %store_err, "could not record fatal generation failure");
    }
    GraphError::TaskExecutionFailed(format!("{stage}: {e}"))
}
