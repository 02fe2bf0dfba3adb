use std::sync::Arc;
use std::time::Instant;

use graph_flow::{
    Context, FlowRunner, Graph, GraphBuilder, GraphError, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{BoardConfig, IndexConfig};
use crate::consensus::{ConsensusRecommendation, ConsensusSynthesizer};
use crate::error::{BoardError, BoardResult, GenerationError};
use crate::generation::TextGenerator;
use crate::models::PatientRecord;
use crate::normalize::validate;
use crate::planner::StrategyPlanner;
use crate::retrieval::index::GuidelineIndex;
use crate::retrieval::retriever::EvidenceRetriever;
use crate::retrieval::store::{InMemoryVectorStore, PgVectorStore, VectorStore};
use crate::specialists::SpecialistPanel;
use crate::tasks::*;

pub const GRAPH_ID: &str = "tumor_board";

/// normalize → classify → plan → analyze → synthesize.
pub fn build_tumor_board_workflow(
    config: &BoardConfig,
    index: GuidelineIndex,
    generator: Arc<dyn TextGenerator>,
) -> Graph {
    let guideline = config.retrieval.guideline_name.clone();
    let retriever = EvidenceRetriever::new(index, config.retrieval.clone());

    let normalize_task = Arc::new(NormalizeCaseTask);
    let normalize_id = normalize_task.id().to_string();

    let classify_task = Arc::new(ClassifyStageTask);
    let classify_id = classify_task.id().to_string();

    let plan_task = Arc::new(PlanStrategyTask::new(Arc::new(StrategyPlanner::new(
        generator.clone(),
        guideline.clone(),
    ))));
    let plan_id = plan_task.id().to_string();

    let analyze_task = Arc::new(AnalyzeSpecialistsTask::new(
        SpecialistPanel::new(retriever, generator.clone()),
        &config.pipeline,
    ));
    let analyze_id = analyze_task.id().to_string();

    let synthesize_task = Arc::new(SynthesizeConsensusTask::new(Arc::new(
        ConsensusSynthesizer::new(generator, guideline, &config.pipeline),
    )));
    let synthesize_id = synthesize_task.id().to_string();

    GraphBuilder::new(GRAPH_ID)
        .add_task(normalize_task)
        .add_task(classify_task)
        .add_task(plan_task)
        .add_task(analyze_task)
        .add_task(synthesize_task)
        .add_edge(&normalize_id, &classify_id)
        .add_edge(&classify_id, &plan_id)
        .add_edge(&plan_id, &analyze_id)
        .add_edge(&analyze_id, &synthesize_id)
        .set_start_task(&normalize_id)
        .build()
}

/// The local JSON-cached store, or pgvector when a database URL is set.
pub async fn open_vector_store(config: &IndexConfig) -> BoardResult<Arc<dyn VectorStore>> {
    match &config.database_url {
        Some(url) => {
            info!(table = %config.table, "using pgvector guideline store");
            Ok(Arc::new(PgVectorStore::connect(url, &config.table).await?))
        }
        None => {
            info!(cache_dir = %config.cache_dir.display(), "using local guideline store");
            Ok(Arc::new(InMemoryVectorStore::with_cache_dir(config.cache_dir.clone())))
        }
    }
}

/// A ready-to-run board: the compiled graph plus the policy needed to
/// admit patient records.
pub struct TumorBoard {
    config: BoardConfig,
    runner: FlowRunner,
    storage: Arc<dyn SessionStorage>,
}

impl TumorBoard {
    pub fn new(config: BoardConfig, index: GuidelineIndex, generator: Arc<dyn TextGenerator>) -> Self {
        let graph = Arc::new(build_tumor_board_workflow(&config, index, generator));
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        Self {
            runner: FlowRunner::new(graph, storage.clone()),
            storage,
            config,
        }
    }

    /// Run one patient through the board.
    ///
    /// Validation failures are returned before any stage runs. Afterwards
    /// only fatal generation failures (and internal workflow errors) escape;
    /// every other failure is absorbed into a degraded recommendation.
    pub async fn analyze(&self, record: &PatientRecord) -> BoardResult<ConsensusRecommendation> {
        let started = Instant::now();
        let warnings = validate(record, self.config.pipeline.missing_data_policy)?;
        for w in &warnings {
            warn!(warning = %w, "patient record accepted with warning");
        }

        let session_id = Uuid::new_v4().to_string();
        let start = self
            .runner
            .graph()
            .start_task_id()
            .ok_or_else(|| BoardError::Config("workflow has no start task".into()))?
            .to_string();
        let session = Session::new_from_task(session_id.clone(), GRAPH_ID, &start);
        let context = session.context.clone();
        context.set(session_keys::PATIENT_RECORD, record).await?;
        self.storage.save(session).await?;

        info!(session_id = %session_id, patient_id = ?record.patient_id, "tumor board run started");
        let outcome = self.runner.run_to_completion(&session_id).await;
        if let Err(e) = self.storage.delete(&session_id).await {
            warn!(session_id = %session_id, error = %e, "could not drop finished session");
        }
        if let Err(e) = outcome {
            return Err(Self::run_failure(&context, e).await);
        }

        let mut recommendation: ConsensusRecommendation =
            context.require(session_keys::RECOMMENDATION).await?;
        for w in warnings {
            if !recommendation.data_quality_warnings.contains(&w) {
                recommendation.data_quality_warnings.push(w);
            }
        }
        let elapsed = started.elapsed().as_secs_f64();
        recommendation.processing_time_seconds = Some(elapsed);

        info!(
            session_id = %session_id,
            stage = %recommendation.stage,
            status = %recommendation.status,
            elapsed_secs = elapsed,
            "tumor board run finished"
        );
        Ok(recommendation)
    }

    async fn run_failure(context: &Context, e: GraphError) -> BoardError {
        match context
            .get::<GenerationError>(session_keys::FATAL_GENERATION_ERROR)
            .await
        {
            Some(fatal) => BoardError::Generation(fatal),
            None => BoardError::Workflow(e),
        }
    }
}
