pub mod config;
pub mod consensus;
pub mod error;
pub mod flags;
pub mod generation;
pub mod models;
pub mod normalize;
pub mod planner;
pub mod retrieval;
pub mod specialists;
pub mod staging;
pub mod tasks;
pub mod workflow;

pub use config::BoardConfig;
pub use consensus::{ConsensusRecommendation, RunStatus};
pub use error::{BoardError, BoardResult, GenerationError, RetrievalError, ValidationError};
pub use generation::{TextGenerator, build_generator};
pub use models::PatientRecord;
pub use staging::{StageCode, StagingResult, classify};
pub use workflow::{TumorBoard, build_tumor_board_workflow, open_vector_store};
