//! Lead-weighted consensus synthesis.
//!
//! The lead role's assessment decides the recommendation; the other
//! assessments inform it. Flags from every role are merged without
//! duplicates, and the run is `complete` only when no specialist failed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::GenerationError;
use crate::flags::transplant_criteria;
use crate::generation::TextGenerator;
use crate::planner::StrategyPlan;
use crate::retrieval::corpus::take_chars;
use crate::specialists::{CaseContext, Priority, SpecialistAssessment, SpecialistRole};
use crate::staging::{StageCode, StageFamily, TreatmentIntent};

const SYSTEM_TEXT: &str =
    "Tumor board chairperson. Lead-specialist consensus grounded in the cited guideline.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => f.write_str("complete"),
            RunStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecommendation {
    pub patient_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub stage: StageCode,
    pub stage_label: String,
    pub stage_rationale: String,
    pub substage_guidance: String,
    pub treatment_intent: TreatmentIntent,
    pub compensation_status: String,
    pub ecog: Option<u8>,
    pub child_pugh: String,
    pub tumor_burden: String,
    pub transplant_criteria: String,
    pub clinical_impression: String,
    pub critical_checks: Vec<String>,
    pub lead_role: Option<SpecialistRole>,
    pub specialist_assessments: Vec<SpecialistAssessment>,
    pub consensus_text: String,
    /// The chair call failed and `consensus_text` was assembled locally.
    pub consensus_fallback: bool,
    pub strategy_fallback: bool,
    pub critical_flags: Vec<String>,
    pub data_quality_warnings: Vec<String>,
    pub status: RunStatus,
    pub guideline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
}

/// Flags of every assessment in order of first appearance.
pub fn aggregate_flags(assessments: &[SpecialistAssessment]) -> Vec<String> {
    let mut seen = HashSet::new();
    assessments
        .iter()
        .flat_map(|a| a.critical_flags.iter())
        .filter(|flag| seen.insert(flag.as_str()))
        .cloned()
        .collect()
}

pub fn run_status(assessments: &[SpecialistAssessment]) -> RunStatus {
    if assessments.iter().any(SpecialistAssessment::is_error) {
        RunStatus::Partial
    } else {
        RunStatus::Complete
    }
}

/// The configured lead when its analysis succeeded, otherwise the first
/// successful role of the highest planned priority.
pub fn select_lead(
    preferred: SpecialistRole,
    plan: &StrategyPlan,
    assessments: &[SpecialistAssessment],
) -> Option<SpecialistRole> {
    let succeeded = |role: SpecialistRole| {
        assessments
            .iter()
            .any(|a| a.role == role && !a.is_error())
    };
    if succeeded(preferred) {
        return Some(preferred);
    }
    [Priority::Primary, Priority::Secondary, Priority::Conditional]
        .into_iter()
        .flat_map(|tier| {
            plan.instructions
                .iter()
                .filter(move |i| i.priority == tier)
                .map(|i| i.role)
        })
        .find(|role| succeeded(*role))
}

fn first_line_treatment(stage: StageCode) -> &'static str {
    match stage.family() {
        StageFamily::VeryEarly | StageFamily::Early => "Resection / Ablation / Transplant (curative)",
        StageFamily::Intermediate => "TACE / TARE (locoregional)",
        StageFamily::Advanced => "Systemic therapy",
        StageFamily::Terminal => "Best supportive care",
        StageFamily::Unclassified => "Complete staging work-up before treatment selection",
    }
}

/// Plan assembled without generation: staging guidance plus the lead's and
/// the other specialists' deterministic recommendations.
pub fn fallback_consensus(
    ctx: &CaseContext,
    lead: Option<SpecialistRole>,
    assessments: &[SpecialistAssessment],
    flags: &[String],
) -> String {
    let staging = &ctx.staging;
    let mut text = format!(
        "CONSENSUS (deterministic summary; chair synthesis unavailable)\n\n\
         PRIMARY TREATMENT: BCLC {} ({}), {} intent. Standard first line: {}.\n\
         STAGE GUIDANCE: {}\n",
        staging.stage,
        staging.label,
        staging.treatment_intent,
        first_line_treatment(staging.stage),
        staging.substage_guidance,
    );

    let lead_assessment = lead.and_then(|role| assessments.iter().find(|a| a.role == role));
    if let Some(a) = lead_assessment {
        text.push_str(&format!("\nLEAD ({}):\n", a.role));
        for rec in &a.recommendations {
            text.push_str(&format!("- {rec}\n"));
        }
    }

    let others = assessments
        .iter()
        .filter(|a| Some(a.role) != lead && !a.is_error() && !a.recommendations.is_empty())
        .collect::<Vec<_>>();
    if !others.is_empty() {
        text.push_str("\nOTHER SPECIALISTS:\n");
        for a in others {
            text.push_str(&format!("- {}: {}\n", a.role, a.recommendations.join("; ")));
        }
    }

    let failed = assessments
        .iter()
        .filter(|a| a.is_error())
        .map(|a| a.role.as_str())
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        text.push_str(&format!("\nUNAVAILABLE: {}\n", failed.join(", ")));
    }
    if !flags.is_empty() {
        text.push_str(&format!("\nRED FLAGS: {}\n", flags.join("; ")));
    }
    text
}

pub struct ConsensusSynthesizer {
    generator: Arc<dyn TextGenerator>,
    guideline: String,
    lead_role: SpecialistRole,
    excerpt_chars: usize,
    flag_limit: usize,
}

impl ConsensusSynthesizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        guideline: impl Into<String>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            generator,
            guideline: guideline.into(),
            lead_role: pipeline.lead_role,
            excerpt_chars: pipeline.consensus_excerpt_chars,
            flag_limit: pipeline.consensus_flag_limit,
        }
    }

    fn summaries(&self, lead: Option<SpecialistRole>, assessments: &[SpecialistAssessment]) -> String {
        assessments
            .iter()
            .map(|a| {
                if a.is_error() {
                    return format!("\n[UNAVAILABLE] {}: analysis failed", a.role);
                }
                let tag = if Some(a.role) == lead { "LEAD" } else { "SUPPORTING" };
                let excerpt = take_chars(&a.assessment, self.excerpt_chars);
                let ellipsis = if excerpt.len() < a.assessment.len() { "..." } else { "" };
                format!(
                    "\n[{tag}] {} ({}): {excerpt}{ellipsis}\nConfidence: {:.2} | Quality: {}",
                    a.role, a.department, a.confidence, a.evidence_quality
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prompt(
        &self,
        ctx: &CaseContext,
        plan: &StrategyPlan,
        lead: Option<SpecialistRole>,
        assessments: &[SpecialistAssessment],
        flags: &[String],
    ) -> String {
        let stage = ctx.stage();
        let lead_name = lead.map_or("the highest-priority specialist", |r| r.as_str());
        let shown_flags = flags
            .iter()
            .take(self.flag_limit)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        format!(
            "TUMOR BOARD CHAIRPERSON synthesizing consensus per the {g} guideline.\n\n\
             {summary}\n\
             BCLC: {stage} ({label})\n\
             Substage: {guidance}\n\
             Treatment intent: {intent}\n\
             Clinical impression: {impression}\n\n\
             SPECIALIST ASSESSMENTS ({lead_name}-led):\n{assessments}\n\n\
             CRITICAL FLAGS: {shown_flags}\n\n\
             GROUNDING RULES:\n\
             1. Base the consensus on the specialists' {g} citations\n\
             2. The {lead_name} LEADS the decision; this is not a majority vote\n\
             3. Note any variance between cited sources\n\
             4. Do not add recommendations beyond {g} support\n\
             5. Focus on FIRST-LINE treatment for BCLC {stage}: {first_line}\n\n\
             PROVIDE:\n\
             PRIMARY TREATMENT, GUIDELINE SUPPORT, RATIONALE, ALTERNATIVES, \
             PREREQUISITES, MONITORING, RED FLAGS, CONSENSUS STATUS",
            g = self.guideline,
            summary = ctx.patient_summary,
            label = ctx.staging.label,
            guidance = ctx.staging.substage_guidance,
            intent = ctx.staging.treatment_intent,
            impression = plan.clinical_impression,
            assessments = self.summaries(lead, assessments),
            first_line = first_line_treatment(stage),
        )
    }

    /// Merge all resolved assessments. A transient chair failure falls back
    /// to a locally assembled plan; a fatal one is returned.
    pub async fn synthesize(
        &self,
        ctx: &CaseContext,
        plan: &StrategyPlan,
        assessments: Vec<SpecialistAssessment>,
    ) -> Result<ConsensusRecommendation, GenerationError> {
        let lead = select_lead(self.lead_role, plan, &assessments);
        let flags = aggregate_flags(&assessments);
        let status = run_status(&assessments);

        let prompt = self.prompt(ctx, plan, lead, &assessments, &flags);
        let (consensus_text, consensus_fallback) =
            match self.generator.complete(&prompt, SYSTEM_TEXT).await {
                Ok(text) => (text, false),
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "consensus generation unavailable, using deterministic summary");
                    (fallback_consensus(ctx, lead, &assessments, &flags), true)
                }
                Err(e) => return Err(e),
            };

        info!(
            stage = %ctx.stage(),
            status = %status,
            lead = ?lead,
            flags = flags.len(),
            "consensus synthesized"
        );

        let case = &ctx.case;
        Ok(ConsensusRecommendation {
            patient_id: case.patient_id.clone(),
            timestamp: Utc::now(),
            stage: ctx.staging.stage,
            stage_label: ctx.staging.label.clone(),
            stage_rationale: ctx.staging.rationale.clone(),
            substage_guidance: ctx.staging.substage_guidance.clone(),
            treatment_intent: ctx.staging.treatment_intent,
            compensation_status: case.clinical.compensation_status().to_string(),
            ecog: case.clinical.performance_status,
            child_pugh: case.clinical.child_pugh_label(),
            tumor_burden: case.tumor.summary_line(),
            transplant_criteria: transplant_criteria(&case.tumor),
            clinical_impression: plan.clinical_impression.clone(),
            critical_checks: plan.critical_checks.clone(),
            lead_role: lead,
            specialist_assessments: assessments,
            consensus_text,
            consensus_fallback,
            strategy_fallback: plan.fallback,
            critical_flags: flags,
            data_quality_warnings: ctx.staging.data_quality_warnings.clone(),
            status,
            guideline: self.guideline.clone(),
            processing_time_seconds: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::fallback_plan;
    use crate::specialists::test_support::{context, lesion};
    use crate::specialists::{EvidenceQuality, SpecialistInstruction};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        reply: Result<String, GenerationError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Recording {
        async fn complete(&self, prompt: &str, _: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn assessment(role: SpecialistRole, flags: &[&str]) -> SpecialistAssessment {
        SpecialistAssessment {
            role,
            department: role.department().to_string(),
            assessment: "x".repeat(1000),
            recommendations: vec![format!("{role} recommendation")],
            confidence: 0.8,
            evidence_quality: EvidenceQuality::Medium,
            critical_flags: flags.iter().map(|f| f.to_string()).collect(),
            role_weight: None,
        }
    }

    fn plan_with(roles: &[(SpecialistRole, Priority)]) -> StrategyPlan {
        StrategyPlan {
            clinical_impression: "impression".into(),
            instructions: roles
                .iter()
                .map(|(role, priority)| SpecialistInstruction {
                    role: *role,
                    priority: *priority,
                    focus: "focus".into(),
                    questions: vec![],
                    guidance_context: None,
                })
                .collect(),
            orchestrator_guidance: None,
            critical_checks: vec![],
            fallback: false,
        }
    }

    fn synthesizer(reply: Result<String, GenerationError>) -> (ConsensusSynthesizer, Arc<Recording>) {
        let generator = Arc::new(Recording {
            reply,
            prompts: Mutex::new(vec![]),
        });
        let synth = ConsensusSynthesizer::new(
            generator.clone(),
            "INASL Puri 3",
            &PipelineConfig::default(),
        );
        (synth, generator)
    }

    #[test]
    fn flags_are_deduplicated_in_order() {
        let flags = aggregate_flags(&[
            assessment(SpecialistRole::Hepatologist, &["a", "b"]),
            assessment(SpecialistRole::Surgeon, &["b", "c", "a"]),
        ]);
        assert_eq!(flags, vec!["a", "b", "c"]);
    }

    #[test]
    fn status_is_partial_iff_any_error() {
        let ok = assessment(SpecialistRole::Hepatologist, &[]);
        let failed = SpecialistAssessment::failed(
            SpecialistRole::Radiologist,
            &GenerationError::Transient("timeout".into()),
        );
        assert_eq!(run_status(&[ok.clone()]), RunStatus::Complete);
        assert_eq!(run_status(&[ok, failed]), RunStatus::Partial);
        assert_eq!(run_status(&[]), RunStatus::Complete);
    }

    #[test]
    fn lead_falls_back_to_highest_priority_success() {
        let plan = plan_with(&[
            (SpecialistRole::Oncologist, Priority::Primary),
            (SpecialistRole::Radiologist, Priority::Secondary),
            (SpecialistRole::Hepatologist, Priority::Primary),
        ]);
        let mut assessments = vec![
            assessment(SpecialistRole::Oncologist, &[]),
            assessment(SpecialistRole::Radiologist, &[]),
            assessment(SpecialistRole::Hepatologist, &[]),
        ];
        assert_eq!(
            select_lead(SpecialistRole::Hepatologist, &plan, &assessments),
            Some(SpecialistRole::Hepatologist)
        );

        assessments[2] = SpecialistAssessment::failed(
            SpecialistRole::Hepatologist,
            &GenerationError::Transient("t".into()),
        );
        assert_eq!(
            select_lead(SpecialistRole::Hepatologist, &plan, &assessments),
            Some(SpecialistRole::Oncologist)
        );
    }

    #[tokio::test]
    async fn prompt_marks_lead_and_truncates_excerpts() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let (synth, generator) = synthesizer(Ok("PRIMARY TREATMENT: resection".into()));
        let plan = fallback_plan(&ctx);
        let result = synth
            .synthesize(
                &ctx,
                &plan,
                vec![
                    assessment(SpecialistRole::Hepatologist, &["flag"]),
                    assessment(SpecialistRole::Surgeon, &[]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.consensus_text, "PRIMARY TREATMENT: resection");
        assert!(!result.consensus_fallback);
        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.lead_role, Some(SpecialistRole::Hepatologist));

        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("[LEAD] Hepatologist"));
        assert!(prompt.contains("[SUPPORTING] Surgeon"));
        assert!(prompt.contains(&format!("{}...", "x".repeat(400))));
        assert!(!prompt.contains(&"x".repeat(401)));
    }

    #[tokio::test]
    async fn transient_chair_failure_uses_deterministic_text() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let (synth, _) = synthesizer(Err(GenerationError::Transient("503".into())));
        let failed = SpecialistAssessment::failed(
            SpecialistRole::Surgeon,
            &GenerationError::Transient("timeout".into()),
        );
        let result = synth
            .synthesize(
                &ctx,
                &fallback_plan(&ctx),
                vec![assessment(SpecialistRole::Hepatologist, &["flag"]), failed],
            )
            .await
            .unwrap();

        assert!(result.consensus_fallback);
        assert_eq!(result.status, RunStatus::Partial);
        assert!(result.consensus_text.contains("BCLC A"));
        assert!(result.consensus_text.contains("- Hepatologist recommendation"));
        assert!(result.consensus_text.contains("UNAVAILABLE: Surgeon"));
        assert_eq!(result.critical_flags, vec!["flag", "Analysis failed"]);
    }

    #[tokio::test]
    async fn fatal_chair_failure_is_returned() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let (synth, _) = synthesizer(Err(GenerationError::Fatal("401".into())));
        let result = synth
            .synthesize(&ctx, &fallback_plan(&ctx), vec![assessment(SpecialistRole::Hepatologist, &[])])
            .await;
        assert!(matches!(result, Err(GenerationError::Fatal(_))));
    }

    #[test]
    fn output_contract_field_names() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let rec = ConsensusRecommendation {
            patient_id: None,
            timestamp: Utc::now(),
            stage: ctx.staging.stage,
            stage_label: String::new(),
            stage_rationale: String::new(),
            substage_guidance: String::new(),
            treatment_intent: ctx.staging.treatment_intent,
            compensation_status: String::new(),
            ecog: Some(0),
            child_pugh: String::new(),
            tumor_burden: String::new(),
            transplant_criteria: String::new(),
            clinical_impression: String::new(),
            critical_checks: vec![],
            lead_role: None,
            specialist_assessments: vec![],
            consensus_text: String::new(),
            consensus_fallback: false,
            strategy_fallback: false,
            critical_flags: vec![],
            data_quality_warnings: vec![],
            status: RunStatus::Complete,
            guideline: String::new(),
            processing_time_seconds: None,
        };
        let value = serde_json::to_value(&rec).unwrap();
        for field in [
            "stage",
            "stage_rationale",
            "treatment_intent",
            "specialist_assessments",
            "consensus_text",
            "critical_flags",
            "status",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["stage"], "A");
        assert_eq!(value["treatment_intent"], "CURATIVE");
        assert_eq!(value["status"], "complete");
    }
}
