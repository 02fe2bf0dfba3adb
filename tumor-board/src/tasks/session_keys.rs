//! Context keys shared by the pipeline tasks.

pub const PATIENT_RECORD: &str = "patient_record";
pub const NORMALIZED_CASE: &str = "normalized_case";
pub const STAGING_RESULT: &str = "staging_result";
pub const CASE_CONTEXT: &str = "case_context";
pub const STRATEGY_PLAN: &str = "strategy_plan";
pub const SPECIALIST_ASSESSMENTS: &str = "specialist_assessments";
pub const RECOMMENDATION: &str = "consensus_recommendation";
/// Set when a stage aborted on a fatal generation failure.
pub const FATAL_GENERATION_ERROR: &str = "fatal_generation_error";
