use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use tumor_board::config::{BoardConfig, MissingDataPolicy};
use tumor_board::retrieval::{Corpus, Embedder, GuidelineIndex, InMemoryVectorStore};
use tumor_board::specialists::{EvidenceQuality, SpecialistRole};
use tumor_board::{
    BoardError, GenerationError, PatientRecord, RetrievalError, RunStatus, StageCode,
    TextGenerator, TumorBoard,
};

const SEP: &str = "---PAGE_BREAK---";

struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; 26];
                for c in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                    v[(c - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Stands in for an unreachable embedding service.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Err(RetrievalError::Embedding("connection refused".into()))
    }
}

/// Answers by prompt shape: strategy, chair, or a specialist assessment.
struct ScriptedBoard {
    plan_reply: String,
    failing_prefix: Option<(&'static str, GenerationError)>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBoard {
    fn new(plan_reply: impl Into<String>) -> Self {
        Self {
            plan_reply: plan_reply.into(),
            failing_prefix: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, prefix: &'static str, error: GenerationError) -> Self {
        self.failing_prefix = Some((prefix, error));
        self
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedBoard {
    async fn complete(&self, prompt: &str, _system: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some((prefix, error)) = &self.failing_prefix {
            if prompt.starts_with(prefix) {
                return Err(error.clone());
            }
        }
        if prompt.starts_with("Generate an HCC tumor board strategy") {
            Ok(self.plan_reply.clone())
        } else if prompt.starts_with("TUMOR BOARD CHAIRPERSON") {
            Ok("Board consensus: proceed with curative-intent treatment.".to_string())
        } else {
            Ok("Quoted evidence supports curative therapy.\n\
                Recommend surgical resection as first-line curative option."
                .to_string())
        }
    }
}

fn plan_json() -> String {
    json!({
        "clinical_impression": "Early HCC with preserved liver function",
        "specialist_instructions": [
            {
                "specialist_role": "Hepatologist",
                "priority": "PRIMARY",
                "focus_area": "Liver reserve",
                "specific_questions": ["Is there clinically significant portal hypertension?"]
            },
            {
                "specialist_role": "Surgeon",
                "priority": "PRIMARY",
                "focus_area": "Resection feasibility"
            }
        ],
        "orchestrator_guidance": "Hepatologist leads",
        "critical_checks": ["Confirm platelet count"]
    })
    .to_string()
}

fn early_stage_record() -> PatientRecord {
    serde_json::from_value(json!({
        "patient_id": "HCC-001",
        "clinical_summary": {
            "etiology": "HBV",
            "ECOG": 0,
            "derived_scores": {
                "Child_Pugh": { "score": 5, "class": "A" },
                "MELD": 8.0,
                "MELD_Na": 9.0
            },
            "labs_baseline": {
                "AFP_ng_ml": 12.0,
                "platelets_k": 210.0,
                "total_bilirubin_mg_dl": 0.9,
                "albumin_g_dl": 4.1,
                "INR": 1.1
            },
            "labs_time_series": [{ "date": "2024-02-01", "AFP_ng_ml": 30.0 }]
        },
        "radiology_summary": {
            "studies": [
                {
                    "date": "2024-01-10",
                    "modality": "MRI",
                    "overall_derived_li_rads": "LR-5",
                    "lesions": [
                        { "segment": "6", "size_cm": { "longest_diameter_cm": 3.0 }, "derived_li_rads": "LR-5" }
                    ]
                },
                {
                    "date": "2024-04-10",
                    "modality": "CT",
                    "lesions": [
                        { "segment": "2", "size_cm": 6.0, "derived_li_rads": "LR-5" },
                        { "segment": "7", "size_cm": 4.0, "derived_li_rads": "LR-5" }
                    ]
                }
            ]
        }
    }))
    .unwrap()
}

async fn board(generator: Arc<ScriptedBoard>, config: BoardConfig) -> TumorBoard {
    let corpus = Corpus::from_text(
        &format!(
            "# BCLC staging\nBCLC A: single nodule, Child-Pugh A, ECOG 0. Resection or ablation.\n\
             {SEP}\
             # Treatment\n| Stage | Treatment |\n|---|---|\n| A | Resection |\n| B | TACE |\n\
             {SEP}\
             # Systemic therapy\nAtezolizumab plus bevacizumab is first-line for BCLC C."
        ),
        SEP,
    );
    let index = GuidelineIndex::build_or_load(
        &corpus,
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(LetterEmbedder),
        &config.chunking,
        None,
        false,
    )
    .await
    .unwrap();
    TumorBoard::new(config, index, generator)
}

#[tokio::test]
async fn early_stage_run_completes_with_reconciled_plan() {
    let generator = Arc::new(ScriptedBoard::new(plan_json()));
    let board = board(generator.clone(), BoardConfig::default()).await;

    let recommendation = board.analyze(&early_stage_record()).await.unwrap();

    // Only the baseline study is staged: one 3cm lesion.
    assert_eq!(recommendation.stage, StageCode::A);
    assert_eq!(recommendation.status, RunStatus::Complete);
    assert!(!recommendation.strategy_fallback);
    assert!(!recommendation.consensus_fallback);
    assert_eq!(recommendation.lead_role, Some(SpecialistRole::Hepatologist));
    assert_eq!(recommendation.patient_id.as_deref(), Some("HCC-001"));
    assert_eq!(recommendation.critical_checks, vec!["Confirm platelet count"]);

    let roles = recommendation
        .specialist_assessments
        .iter()
        .map(|a| a.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![
            SpecialistRole::Hepatologist,
            SpecialistRole::Surgeon,
            SpecialistRole::Radiologist,
            SpecialistRole::Oncologist,
        ]
    );
    assert!(recommendation.processing_time_seconds.is_some());
    // plan + four specialists + chair
    assert_eq!(generator.prompt_count(), 6);
}

#[tokio::test]
async fn transient_specialist_failure_yields_partial_run() {
    let generator = Arc::new(
        ScriptedBoard::new(plan_json())
            .failing("SURGEON", GenerationError::Transient("429 Too Many Requests".into())),
    );
    let board = board(generator, BoardConfig::default()).await;

    let recommendation = board.analyze(&early_stage_record()).await.unwrap();

    assert_eq!(recommendation.status, RunStatus::Partial);
    let surgeon = recommendation
        .specialist_assessments
        .iter()
        .find(|a| a.role == SpecialistRole::Surgeon)
        .unwrap();
    assert!(surgeon.is_error());
    assert!(recommendation.critical_flags.contains(&"Analysis failed".to_string()));
    assert!(!recommendation.consensus_text.is_empty());
}

#[tokio::test]
async fn malformed_plan_falls_back_to_hepatologist_only() {
    let generator = Arc::new(ScriptedBoard::new("Here is my plan: consult everyone."));
    let board = board(generator, BoardConfig::default()).await;

    let recommendation = board.analyze(&early_stage_record()).await.unwrap();

    assert!(recommendation.strategy_fallback);
    assert_eq!(recommendation.specialist_assessments.len(), 1);
    assert_eq!(
        recommendation.specialist_assessments[0].role,
        SpecialistRole::Hepatologist
    );
    assert_eq!(recommendation.status, RunStatus::Complete);
}

#[tokio::test]
async fn fatal_generation_failure_aborts_the_run() {
    let generator = Arc::new(
        ScriptedBoard::new(plan_json())
            .failing("SURGEON", GenerationError::Fatal("401 Unauthorized".into())),
    );
    let board = board(generator.clone(), BoardConfig::default()).await;

    let err = board.analyze(&early_stage_record()).await.unwrap_err();

    assert!(matches!(err, BoardError::Generation(GenerationError::Fatal(_))));
    assert!(
        !generator
            .prompts
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.starts_with("TUMOR BOARD CHAIRPERSON"))
    );
}

#[tokio::test]
async fn missing_imaging_is_rejected_before_any_generation() {
    let generator = Arc::new(ScriptedBoard::new(plan_json()));
    let board = board(generator.clone(), BoardConfig::default()).await;
    let mut record = early_stage_record();
    record.radiology_summary = None;

    let err = board.analyze(&record).await.unwrap_err();

    assert!(matches!(err, BoardError::Validation(_)));
    assert_eq!(generator.prompt_count(), 0);
}

#[tokio::test]
async fn missing_performance_status_depends_on_policy() {
    let mut record = early_stage_record();
    if let Some(clinical) = record.clinical_summary.as_mut() {
        clinical.ecog = None;
    }

    let lenient = board(
        Arc::new(ScriptedBoard::new(plan_json())),
        BoardConfig::default(),
    )
    .await;
    let recommendation = lenient.analyze(&record).await.unwrap();
    assert!(!recommendation.data_quality_warnings.is_empty());

    let mut strict_config = BoardConfig::default();
    strict_config.pipeline.missing_data_policy = MissingDataPolicy::Reject;
    let strict = board(Arc::new(ScriptedBoard::new(plan_json())), strict_config).await;
    assert!(matches!(
        strict.analyze(&record).await,
        Err(BoardError::Validation(_))
    ));
}

#[tokio::test]
async fn retrieval_failure_degrades_to_empty_evidence() {
    let generator = Arc::new(ScriptedBoard::new(plan_json()));
    let config = BoardConfig::default();
    let guideline = config.retrieval.guideline_name.clone();
    let index = GuidelineIndex::attach(
        "unreachable",
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(BrokenEmbedder),
    );
    let board = TumorBoard::new(config, index, generator.clone());

    let recommendation = board.analyze(&early_stage_record()).await.unwrap();

    assert_eq!(recommendation.status, RunStatus::Complete);
    assert_eq!(recommendation.specialist_assessments.len(), 4);
    for assessment in &recommendation.specialist_assessments {
        assert_eq!(assessment.confidence, 0.0);
        assert_eq!(assessment.evidence_quality, EvidenceQuality::None);
    }

    let placeholder = format!("No relevant {guideline} guideline sections found");
    let prompts = generator.prompts.lock().unwrap();
    let specialist_prompts = prompts
        .iter()
        .filter(|p| {
            !p.starts_with("Generate an HCC tumor board strategy")
                && !p.starts_with("TUMOR BOARD CHAIRPERSON")
        })
        .collect::<Vec<_>>();
    assert_eq!(specialist_prompts.len(), 4);
    assert!(specialist_prompts.iter().all(|p| p.contains(&placeholder)));
}
