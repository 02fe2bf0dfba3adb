//! Strategy planning: which specialists to consult, at what priority, and
//! with what focus.
//!
//! The role selection comes from a fixed table keyed by stage. A generation
//! call elaborates the table into focus areas and questions; its output is
//! parsed strictly and reconciled against the table, so generated text can
//! sharpen instructions but never add, drop or re-prioritize a role. When
//! the output is unusable the planner falls back to a single hepatologist
//! instruction instead of blocking the run.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::generation::{TextGenerator, parse_structured};
use crate::specialists::{CaseContext, Priority, SpecialistInstruction, SpecialistRole};
use crate::staging::StageCode;

const SYSTEM_TEXT: &str = "Medical strategy AI. Output JSON only.";

/// One row of the stage rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleRule {
    pub role: SpecialistRole,
    pub priority: Priority,
    pub focus: &'static str,
}

const fn rule(role: SpecialistRole, priority: Priority, focus: &'static str) -> RoleRule {
    RoleRule {
        role,
        priority,
        focus,
    }
}

/// Roles to consult for this case, in consultation order.
pub fn rule_table(ctx: &CaseContext) -> Vec<RoleRule> {
    use Priority::{Conditional, Primary, Secondary};
    use SpecialistRole::{Hepatologist, Oncologist, Pathologist, Radiologist, Surgeon};

    let mut rules = match ctx.stage() {
        StageCode::D => vec![
            rule(Hepatologist, Primary, "Palliative care and symptom management"),
            rule(Oncologist, Secondary, "Best supportive care options"),
        ],
        StageCode::C2 => vec![
            rule(Oncologist, Primary, "Systemic therapy for extrahepatic disease"),
            rule(Hepatologist, Primary, "Liver function support during systemic therapy"),
            rule(Radiologist, Secondary, "Imaging surveillance"),
        ],
        StageCode::C1 | StageCode::C => vec![
            rule(Oncologist, Primary, "Systemic therapy options"),
            rule(Radiologist, Secondary, "Y90-TARE for portal vein tumor thrombosis"),
            rule(Hepatologist, Primary, "Liver function assessment"),
        ],
        StageCode::B3 => vec![
            rule(Radiologist, Primary, "Y90-TARE versus TACE feasibility"),
            rule(Hepatologist, Primary, "Treatment tolerance"),
            rule(Oncologist, Secondary, "Systemic therapy if locoregional options are limited"),
        ],
        StageCode::B1 | StageCode::B2 => vec![
            rule(Radiologist, Primary, "TACE planning and feasibility"),
            rule(Hepatologist, Primary, "Liver function and treatment tolerance"),
            rule(Surgeon, Conditional, "Transplant evaluation"),
        ],
        StageCode::Zero | StageCode::A => vec![
            rule(Hepatologist, Primary, "Portal hypertension assessment and treatment tolerance"),
            rule(Surgeon, Primary, "Resection feasibility"),
            rule(Radiologist, Primary, "Ablation feasibility"),
            rule(Oncologist, Conditional, "Systemic options only if curative or locoregional therapy is contraindicated"),
        ],
        StageCode::Unclassified => vec![rule(
            Hepatologist,
            Primary,
            "Identify the missing data needed for staging",
        )],
    };

    // Terminal stage stays hepatologist + oncologist.
    let lirads = ctx.li_rads();
    if ctx.stage() != StageCode::D
        && (ctx.case.pathology.biopsy_performed || lirads.is_indeterminate())
    {
        rules.push(rule(
            Pathologist,
            Conditional,
            "Histologic confirmation and grading",
        ));
    }
    rules
}

/// What the generation call is asked to return.
#[derive(Debug, Deserialize)]
pub struct GeneratedPlan {
    #[serde(default)]
    pub clinical_impression: String,
    pub specialist_instructions: Vec<GeneratedInstruction>,
    #[serde(default)]
    pub orchestrator_guidance: Option<String>,
    #[serde(default)]
    pub critical_checks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedInstruction {
    pub specialist_role: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub focus_area: String,
    #[serde(default)]
    pub specific_questions: Vec<String>,
    #[serde(default)]
    pub guidance_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub clinical_impression: String,
    pub instructions: Vec<SpecialistInstruction>,
    pub orchestrator_guidance: Option<String>,
    pub critical_checks: Vec<String>,
    /// True when the deterministic fallback replaced the generated plan.
    pub fallback: bool,
}

/// Single hepatologist instruction used whenever generation cannot be used.
pub fn fallback_plan(ctx: &CaseContext) -> StrategyPlan {
    StrategyPlan {
        clinical_impression: format!("BCLC {}", ctx.stage()),
        instructions: vec![SpecialistInstruction {
            role: SpecialistRole::Hepatologist,
            priority: Priority::Primary,
            focus: "Lead decision maker".to_string(),
            questions: vec![
                "Treatment tolerance?".to_string(),
                "Portal HTN assessment?".to_string(),
            ],
            guidance_context: Some("Hepatologist leads all HCC decisions".to_string()),
        }],
        orchestrator_guidance: Some("Hepatologist-led consensus".to_string()),
        critical_checks: vec![
            "BCLC staging verified".to_string(),
            "Guidelines applied".to_string(),
        ],
        fallback: true,
    }
}

/// Align a parsed plan with the rule table. Roles outside the table and
/// duplicates are dropped, priorities are taken from the table, and table
/// roles the plan omitted are filled in with the table's focus. `None` when
/// the plan named no usable role.
pub fn reconcile(generated: GeneratedPlan, rules: &[RoleRule]) -> Option<StrategyPlan> {
    let mut seen = HashSet::new();
    let mut elaborated = Vec::new();
    for instruction in generated.specialist_instructions {
        let Some(role) = SpecialistRole::parse(&instruction.specialist_role) else {
            warn!(role = %instruction.specialist_role, "planner named an unknown role");
            continue;
        };
        let Some(rule) = rules.iter().find(|r| r.role == role) else {
            warn!(role = %role, "planner named a role outside the rule table");
            continue;
        };
        if !seen.insert(role) {
            continue;
        }
        let requested = instruction.priority.as_deref().and_then(Priority::parse);
        if requested.is_some_and(|p| p != rule.priority) {
            warn!(role = %role, requested = ?requested, "planner priority overridden by rule table");
        }
        elaborated.push(SpecialistInstruction {
            role,
            priority: rule.priority,
            focus: if instruction.focus_area.trim().is_empty() {
                rule.focus.to_string()
            } else {
                instruction.focus_area
            },
            questions: instruction.specific_questions,
            guidance_context: instruction.guidance_context,
        });
    }

    if elaborated.is_empty() {
        return None;
    }

    let instructions = rules
        .iter()
        .map(|rule| {
            match elaborated.iter().position(|i| i.role == rule.role) {
                Some(index) => elaborated.swap_remove(index),
                None => SpecialistInstruction {
                    role: rule.role,
                    priority: rule.priority,
                    focus: rule.focus.to_string(),
                    questions: Vec::new(),
                    guidance_context: None,
                },
            }
        })
        .collect();

    Some(StrategyPlan {
        clinical_impression: generated.clinical_impression,
        instructions,
        orchestrator_guidance: generated.orchestrator_guidance,
        critical_checks: generated.critical_checks,
        fallback: false,
    })
}

fn build_prompt(ctx: &CaseContext, rules: &[RoleRule], guideline: &str) -> String {
    let priorities = rules
        .iter()
        .map(|r| format!("- {} ({}): {}", r.role, r.priority, r.focus))
        .collect::<Vec<_>>()
        .join("\n");
    let stage = ctx.stage();
    format!(
        "Generate an HCC tumor board strategy per the {guideline} guideline.\n\n\
         {summary}\n\
         BCLC: {stage}\n\
         Rationale: {rationale}\n\
         Substage guidance: {guidance}\n\n\
         SPECIALIST PRIORITIES for BCLC {stage}:\n{priorities}\n\n\
         Return JSON of exactly this shape:\n\
         {{\n  \
           \"clinical_impression\": \"...\",\n  \
           \"specialist_instructions\": [\n    {{\n      \
             \"specialist_role\": \"Hepatologist | Radiologist | Surgeon | Oncologist | Pathologist\",\n      \
             \"priority\": \"PRIMARY | SECONDARY | CONDITIONAL\",\n      \
             \"focus_area\": \"...\",\n      \
             \"specific_questions\": [\"...\"],\n      \
             \"guidance_context\": \"why this specialist is needed\"\n    }}\n  ],\n  \
           \"orchestrator_guidance\": \"...\",\n  \
           \"critical_checks\": [\"...\"]\n\
         }}\n\n\
         RULES:\n\
         1. Include ONLY the specialists listed above, with the listed priorities\n\
         2. The Hepatologist is the lead decision maker\n\
         3. Questions must be answerable from the {guideline} guideline",
        summary = ctx.patient_summary,
        rationale = ctx.staging.rationale,
        guidance = ctx.staging.substage_guidance,
    )
}

pub struct StrategyPlanner {
    generator: Arc<dyn TextGenerator>,
    guideline: String,
}

impl StrategyPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>, guideline: impl Into<String>) -> Self {
        Self {
            generator,
            guideline: guideline.into(),
        }
    }

    /// Plan the consultation. Only a fatal generation failure is an error;
    /// malformed output and exhausted transient retries yield the fallback.
    pub async fn plan(&self, ctx: &CaseContext) -> Result<StrategyPlan, GenerationError> {
        let rules = rule_table(ctx);
        let prompt = build_prompt(ctx, &rules, &self.guideline);

        let plan = match self.generator.complete(&prompt, SYSTEM_TEXT).await {
            Ok(raw) => match parse_structured::<GeneratedPlan>(&raw, "strategy plan") {
                Ok(generated) => reconcile(generated, &rules).unwrap_or_else(|| {
                    warn!("strategy plan named no usable specialist, using fallback");
                    fallback_plan(ctx)
                }),
                Err(e) => {
                    warn!(error = %e, "strategy plan malformed, using fallback");
                    fallback_plan(ctx)
                }
            },
            Err(e) if e.is_transient() => {
                warn!(error = %e, "strategy generation unavailable, using fallback");
                fallback_plan(ctx)
            }
            Err(e) => return Err(e),
        };

        info!(
            stage = %ctx.stage(),
            specialists = plan.instructions.len(),
            fallback = plan.fallback,
            "strategy planned"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LiRads;
    use crate::specialists::test_support::{context, lesion};
    use async_trait::async_trait;

    struct Fixed(Result<String, GenerationError>);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn complete(&self, _: &str, _: &str) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    fn planner(reply: Result<String, GenerationError>) -> StrategyPlanner {
        StrategyPlanner::new(Arc::new(Fixed(reply)), "INASL Puri 3")
    }

    fn roles(plan: &StrategyPlan) -> Vec<SpecialistRole> {
        plan.instructions.iter().map(|i| i.role).collect()
    }

    #[test]
    fn early_stage_table() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let rules = rule_table(&ctx);
        assert_eq!(
            rules.iter().map(|r| (r.role, r.priority)).collect::<Vec<_>>(),
            vec![
                (SpecialistRole::Hepatologist, Priority::Primary),
                (SpecialistRole::Surgeon, Priority::Primary),
                (SpecialistRole::Radiologist, Priority::Primary),
                (SpecialistRole::Oncologist, Priority::Conditional),
            ]
        );
    }

    #[test]
    fn pathologist_joins_for_indeterminate_imaging() {
        let mut ctx = context(200.0, vec![lesion(3.0, "6")]);
        ctx.case.tumor.overall_certainty = Some(LiRads::Lr4);
        let rules = rule_table(&ctx);
        assert_eq!(rules.last().unwrap().role, SpecialistRole::Pathologist);
        assert_eq!(rules.last().unwrap().priority, Priority::Conditional);
    }

    #[test]
    fn terminal_stage_never_adds_pathologist() {
        let mut ctx = context(200.0, vec![lesion(3.0, "6")]);
        ctx.staging.stage = StageCode::D;
        ctx.case.pathology.biopsy_performed = true;
        ctx.case.tumor.overall_certainty = Some(LiRads::Lr3);
        assert_eq!(
            rule_table(&ctx).iter().map(|r| r.role).collect::<Vec<_>>(),
            vec![SpecialistRole::Hepatologist, SpecialistRole::Oncologist]
        );
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_hepatologist() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        for reply in ["not json at all", "{\"specialists\": []}", "```json\n[1, 2]\n```"] {
            let plan = planner(Ok(reply.to_string())).plan(&ctx).await.unwrap();
            assert!(plan.fallback);
            assert_eq!(plan.instructions.len(), 1);
            assert_eq!(plan.instructions[0].role, SpecialistRole::Hepatologist);
            assert_eq!(plan.instructions[0].priority, Priority::Primary);
        }
    }

    #[tokio::test]
    async fn fallback_is_idempotent() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let first = planner(Ok("oops".into())).plan(&ctx).await.unwrap();
        let second = planner(Ok("oops".into())).plan(&ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, fallback_plan(&ctx));
    }

    #[tokio::test]
    async fn transient_failure_falls_back_and_fatal_aborts() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let plan = planner(Err(GenerationError::Transient("429".into())))
            .plan(&ctx)
            .await
            .unwrap();
        assert!(plan.fallback);

        let result = planner(Err(GenerationError::Fatal("401".into())))
            .plan(&ctx)
            .await;
        assert!(matches!(result, Err(GenerationError::Fatal(_))));
    }

    #[tokio::test]
    async fn generated_plan_is_reconciled_with_the_table() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let reply = r#"```json
        {
          "clinical_impression": "Early HCC, compensated",
          "specialist_instructions": [
            {"specialist_role": "Radiologist", "priority": "SECONDARY",
             "focus_area": "Ablation margins", "specific_questions": ["Is RFA feasible?"]},
            {"specialist_role": "Nutritionist", "priority": "PRIMARY", "focus_area": "Diet"},
            {"specialist_role": "radiologist", "priority": "PRIMARY", "focus_area": "dup"}
          ],
          "critical_checks": ["Confirm platelets"]
        }
        ```"#;
        let plan = planner(Ok(reply.into())).plan(&ctx).await.unwrap();
        assert!(!plan.fallback);
        assert_eq!(
            roles(&plan),
            vec![
                SpecialistRole::Hepatologist,
                SpecialistRole::Surgeon,
                SpecialistRole::Radiologist,
                SpecialistRole::Oncologist,
            ]
        );
        let radiologist = &plan.instructions[2];
        assert_eq!(radiologist.priority, Priority::Primary);
        assert_eq!(radiologist.focus, "Ablation margins");
        assert_eq!(radiologist.questions, vec!["Is RFA feasible?"]);
        assert_eq!(plan.instructions[1].focus, "Resection feasibility");
        assert_eq!(plan.critical_checks, vec!["Confirm platelets"]);
    }

    #[tokio::test]
    async fn plan_without_usable_roles_falls_back() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let reply = r#"{"specialist_instructions": [
            {"specialist_role": "Pathologist", "focus_area": "not in table for LR-5"}
        ]}"#;
        let plan = planner(Ok(reply.into())).plan(&ctx).await.unwrap();
        assert!(plan.fallback);
    }
}
