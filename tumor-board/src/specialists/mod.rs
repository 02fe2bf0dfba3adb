//! Specialist analyzers.
//!
//! Every role follows the same steps: build a role query, retrieve guideline
//! evidence, render it into a grounded prompt, call the generator, then
//! attach deterministic recommendations and critical flags. The role-specific
//! parts live in one module per role behind the [`Specialist`] trait;
//! [`SpecialistRole`] selects the implementation.

pub mod evidence;
pub mod hepatologist;
pub mod oncologist;
pub mod pathologist;
pub mod radiologist;
pub mod surgeon;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::flags::PortalHypertensionRisk;
use crate::generation::TextGenerator;
use crate::models::{ChildPughClass, LiRads, NormalizedCase};
use crate::normalize::concise_patient_summary;
use crate::retrieval::retriever::EvidenceRetriever;
use crate::staging::{StageCode, StagingResult};

pub use evidence::EvidenceQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpecialistRole {
    Hepatologist,
    Radiologist,
    Surgeon,
    Oncologist,
    Pathologist,
}

impl SpecialistRole {
    pub const ALL: [SpecialistRole; 5] = [
        SpecialistRole::Hepatologist,
        SpecialistRole::Radiologist,
        SpecialistRole::Surgeon,
        SpecialistRole::Oncologist,
        SpecialistRole::Pathologist,
    ];

    /// Exact role name, case-insensitive. Generated text naming anything
    /// else is not a role.
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(wanted))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistRole::Hepatologist => "Hepatologist",
            SpecialistRole::Radiologist => "Radiologist",
            SpecialistRole::Surgeon => "Surgeon",
            SpecialistRole::Oncologist => "Oncologist",
            SpecialistRole::Pathologist => "Pathologist",
        }
    }

    pub fn department(&self) -> &'static str {
        match self {
            SpecialistRole::Hepatologist => "Hepatology (Lead Decision Maker)",
            SpecialistRole::Radiologist => "Interventional Radiology",
            SpecialistRole::Surgeon => "Surgical Oncology / Transplant Surgery",
            SpecialistRole::Oncologist => "Medical Oncology",
            SpecialistRole::Pathologist => "Pathology",
        }
    }

    fn specialist(&self) -> &'static dyn Specialist {
        match self {
            SpecialistRole::Hepatologist => &hepatologist::Hepatologist,
            SpecialistRole::Radiologist => &radiologist::Radiologist,
            SpecialistRole::Surgeon => &surgeon::Surgeon,
            SpecialistRole::Oncologist => &oncologist::Oncologist,
            SpecialistRole::Pathologist => &pathologist::Pathologist,
        }
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Primary,
    Secondary,
    Conditional,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRIMARY" | "LEAD" => Some(Priority::Primary),
            "SECONDARY" => Some(Priority::Secondary),
            "CONDITIONAL" | "BACKUP" => Some(Priority::Conditional),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Primary => "PRIMARY",
            Priority::Secondary => "SECONDARY",
            Priority::Conditional => "CONDITIONAL",
        };
        f.write_str(label)
    }
}

/// How much the oncologist's view should count for the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleWeight {
    Primary,
    Secondary,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistInstruction {
    pub role: SpecialistRole,
    pub priority: Priority,
    pub focus: String,
    pub questions: Vec<String>,
    #[serde(default)]
    pub guidance_context: Option<String>,
}

impl SpecialistInstruction {
    fn prompt_text(&self) -> String {
        format!(
            "\nFOCUS: {}\nQUESTIONS: {}",
            self.focus,
            self.questions.join("; ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistAssessment {
    pub role: SpecialistRole,
    pub department: String,
    pub assessment: String,
    pub recommendations: Vec<String>,
    pub confidence: f32,
    pub evidence_quality: EvidenceQuality,
    pub critical_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_weight: Option<RoleWeight>,
}

impl SpecialistAssessment {
    /// Recorded in place of an analysis whose generation call failed.
    pub fn failed(role: SpecialistRole, error: &GenerationError) -> Self {
        Self {
            role,
            department: role.department().to_string(),
            assessment: format!("Error: {error}"),
            recommendations: Vec::new(),
            confidence: 0.0,
            evidence_quality: EvidenceQuality::Error,
            critical_flags: vec!["Analysis failed".to_string()],
            role_weight: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.evidence_quality == EvidenceQuality::Error
    }
}

/// Read-only case data shared by all specialists of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseContext {
    pub case: NormalizedCase,
    pub staging: StagingResult,
    pub patient_summary: String,
}

impl CaseContext {
    /// Values the classifier substituted are written back into the clinical
    /// state, so prompts, flags and retrieval see what staging saw.
    pub fn new(mut case: NormalizedCase, staging: StagingResult) -> Self {
        let clinical = &mut case.clinical;
        clinical
            .performance_status
            .get_or_insert(staging.performance_status);
        clinical
            .liver_function
            .class
            .get_or_insert(staging.child_pugh_class);
        clinical
            .liver_function
            .score
            .get_or_insert(staging.child_pugh_score);
        let patient_summary = concise_patient_summary(&case);
        Self {
            case,
            staging,
            patient_summary,
        }
    }

    pub fn stage(&self) -> StageCode {
        self.staging.stage
    }

    pub fn child_pugh_class(&self) -> Option<ChildPughClass> {
        self.case.clinical.liver_function.class
    }

    pub fn portal_risk(&self) -> PortalHypertensionRisk {
        PortalHypertensionRisk::from_platelets(self.case.clinical.labs.platelets_k)
    }

    pub fn platelets_label(&self) -> String {
        self.case
            .clinical
            .labs
            .platelets_k
            .map_or_else(|| "n/a".to_string(), |p| format!("{p}"))
    }

    pub fn li_rads(&self) -> LiRads {
        self.case.tumor.certainty()
    }
}

/// Everything a role prompt needs besides the case itself.
pub struct PromptFrame<'a> {
    pub guideline: &'a str,
    pub evidence: &'a str,
    pub instruction: &'a str,
}

impl PromptFrame<'_> {
    /// Evidence block followed by the grounding rules every role shares.
    pub fn grounded_evidence(&self, focus: &str) -> String {
        let bar = "=".repeat(60);
        format!(
            "{bar}\n{g} GUIDELINE EXCERPTS:\n{evidence}\n{bar}\n{instruction}\n\n\
             STRICT GROUNDING RULES ({g} ONLY):\n\
             1. Use ONLY the {g} guideline text above\n\
             2. QUOTE relevant passages FIRST with [SOURCE #]\n\
             3. Format: \"According to {g} [SOURCE X]: '<quote>'. This indicates...\"\n\
             4. If the excerpts are silent, state: \"{g} guideline does not explicitly address...\"\n\
             5. NO external knowledge beyond {g}\n\
             6. {focus}\n{bar}",
            g = self.guideline,
            evidence = self.evidence,
            instruction = self.instruction,
        )
    }
}

/// Role-specific behaviour. Implementations are stateless.
pub trait Specialist: Send + Sync {
    fn role(&self) -> SpecialistRole;

    /// System text for the generation call.
    fn system_text(&self) -> &'static str;

    /// Retrieval query before instruction focus and augmentation.
    fn query(&self, ctx: &CaseContext) -> String;

    /// Stage and Child-Pugh terms used to augment and rerank retrieval.
    fn retrieval_terms(&self, ctx: &CaseContext) -> (Option<StageCode>, Option<ChildPughClass>) {
        (Some(ctx.stage()), ctx.child_pugh_class())
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String;

    fn recommendations(&self, ctx: &CaseContext, response: &str) -> Vec<String>;

    /// Deterministic flags; never derived from generated text.
    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String>;

    /// A fixed assessment that makes retrieval and generation unnecessary.
    fn short_circuit(&self, _ctx: &CaseContext) -> Option<SpecialistAssessment> {
        None
    }

    fn role_weight(&self, _ctx: &CaseContext) -> Option<RoleWeight> {
        None
    }
}

/// The analyzers of one run, sharing retriever and generator.
#[derive(Clone)]
pub struct SpecialistPanel {
    retriever: EvidenceRetriever,
    generator: Arc<dyn TextGenerator>,
}

impl SpecialistPanel {
    pub fn new(retriever: EvidenceRetriever, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Analyze one role. Transient generation failures become an error
    /// assessment; only fatal failures are returned as `Err`.
    pub async fn analyze(
        &self,
        role: SpecialistRole,
        ctx: &CaseContext,
        instruction: Option<&SpecialistInstruction>,
    ) -> Result<SpecialistAssessment, GenerationError> {
        match self.run(role.specialist(), ctx, instruction).await {
            Ok(assessment) => Ok(assessment),
            Err(e) if e.is_transient() => {
                warn!(role = %role, error = %e, "specialist analysis failed");
                Ok(SpecialistAssessment::failed(role, &e))
            }
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        specialist: &dyn Specialist,
        ctx: &CaseContext,
        instruction: Option<&SpecialistInstruction>,
    ) -> Result<SpecialistAssessment, GenerationError> {
        let role = specialist.role();
        if let Some(fixed) = specialist.short_circuit(ctx) {
            info!(role = %role, "specialist consultation not indicated");
            return Ok(fixed);
        }
        info!(role = %role, stage = %ctx.stage(), "specialist analyzing");

        let mut query = specialist.query(ctx);
        if let Some(instruction) = instruction {
            query.push(' ');
            query.push_str(&instruction.focus);
        }
        let (stage, child_pugh) = specialist.retrieval_terms(ctx);
        let groups = self
            .retriever
            .retrieve_or_empty(&query, stage, child_pugh)
            .await;

        let evidence = self.retriever.render_context(&groups);
        let instruction_text = instruction.map(|i| i.prompt_text()).unwrap_or_default();
        let frame = PromptFrame {
            guideline: &self.retriever.config().guideline_name,
            evidence: &evidence,
            instruction: &instruction_text,
        };
        let prompt = specialist.prompt(ctx, &frame);

        let response = self
            .generator
            .complete(&prompt, specialist.system_text())
            .await?;

        info!(role = %role, groups = groups.len(), "specialist complete");
        Ok(SpecialistAssessment {
            role,
            department: role.department().to_string(),
            recommendations: specialist.recommendations(ctx, &response),
            assessment: response,
            confidence: evidence::confidence(&groups),
            evidence_quality: evidence::quality(&groups),
            critical_flags: specialist.critical_flags(ctx),
            role_weight: specialist.role_weight(ctx),
        })
    }
}
