//! Interventional radiology: imaging certainty and locoregional options.

use super::{CaseContext, PromptFrame, Specialist, SpecialistRole};
use crate::models::{ChildPughClass, LiRads};
use crate::staging::{StageCode, StageFamily};

pub struct Radiologist;

/// Locoregional options that the tumor geometry allows at this stage.
pub fn intervention_options(ctx: &CaseContext) -> Vec<String> {
    let tumor = &ctx.case.tumor;
    let count = tumor.lesion_count();
    let max = tumor.max_diameter_cm();
    let portal_htn = ctx.staging.portal_hypertension;
    let mut options = Vec::new();

    match ctx.stage().family() {
        StageFamily::VeryEarly => {
            options.push("RFA/MWA first-line for very early HCC".to_string());
            if !portal_htn {
                options.push("Resection alternative if no portal hypertension".to_string());
            }
        }
        StageFamily::Early => {
            if count <= 3 && max <= 3.0 {
                options.push(format!(
                    "Ablation feasible ({count} lesion(s) <=3cm)"
                ));
            }
            if count == 1 {
                options.push("Resection option for single lesion (surgical review)".to_string());
            }
            if max > 3.0 {
                options.push(format!("TACE if ablation not feasible (max {max:.1}cm)"));
            }
        }
        StageFamily::Intermediate => {
            options.push("TACE first-line for intermediate stage".to_string());
            options.push("Y90-TARE alternative to TACE".to_string());
            if ctx.stage() == StageCode::B3 {
                options.push("Systemic therapy for extensive multifocal disease".to_string());
            }
        }
        StageFamily::Advanced => {
            if ctx.stage() == StageCode::C1 {
                options.push("Y90-TARE for portal vein tumor thrombosis".to_string());
            }
            options.push("Systemic therapy primary for advanced stage".to_string());
        }
        StageFamily::Terminal | StageFamily::Unclassified => {}
    }

    if options.is_empty() {
        options.push("Locoregional options limited".to_string());
    }
    options
}

impl Specialist for Radiologist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Radiologist
    }

    fn system_text(&self) -> &'static str {
        "You are an interventional radiologist on a hepatocellular carcinoma tumor board. \
         Ground every statement in the quoted guideline excerpts."
    }

    fn query(&self, ctx: &CaseContext) -> String {
        let tumor = &ctx.case.tumor;
        format!(
            "LI-RADS {} imaging, {} lesion(s), {} distribution, max {:.1}cm. BCLC {}. \
             RFA/MWA, TACE, Y90-TARE, SBRT feasibility?",
            ctx.li_rads(),
            tumor.lesion_count(),
            tumor.distribution(),
            tumor.max_diameter_cm(),
            ctx.stage()
        )
    }

    fn retrieval_terms(&self, ctx: &CaseContext) -> (Option<StageCode>, Option<ChildPughClass>) {
        (Some(ctx.stage()), None)
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String {
        let tumor = &ctx.case.tumor;
        let lesions = tumor
            .descriptions()
            .iter()
            .map(|d| format!("- {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "INTERVENTIONAL RADIOLOGIST\n\n\
             PATIENT:\n{summary}\n\n\
             IMAGING: {modality}, LI-RADS {lirads}\n\
             LESIONS:\n{lesions}\n\
             PVTT: {pvtt} | Extrahepatic: {ehs}\n\
             BCLC {stage} ({label})\n\
             Candidate options: {options}\n\n\
             {evidence}\n\n\
             PROVIDE:\n\
             1. IMAGING ASSESSMENT (diagnostic certainty, need for biopsy)\n\
             2. ABLATION FEASIBILITY (size, location, number)\n\
             3. TACE / Y90-TARE SUITABILITY\n\
             4. SBRT OR OTHER OPTIONS\n\
             5. RECOMMENDED INTERVENTION with the supporting [SOURCE #]",
            summary = ctx.patient_summary,
            modality = tumor.modality.as_deref().unwrap_or("imaging"),
            lirads = ctx.li_rads(),
            pvtt = yes_no(tumor.has_portal_vein_thrombus()),
            ehs = yes_no(tumor.has_extrahepatic_metastasis()),
            stage = ctx.stage(),
            label = ctx.staging.label,
            options = intervention_options(ctx).join("; "),
            evidence = frame.grounded_evidence(
                "Focus on imaging certainty and locoregional treatment feasibility"
            ),
        )
    }

    fn recommendations(&self, ctx: &CaseContext, _response: &str) -> Vec<String> {
        intervention_options(ctx)
    }

    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String> {
        let tumor = &ctx.case.tumor;
        let mut flags = Vec::new();
        if tumor.has_portal_vein_thrombus() {
            flags.push("PVTT detected - consider Y90-TARE".to_string());
        }
        if tumor.has_extrahepatic_metastasis() {
            flags.push("Extrahepatic metastasis - systemic therapy indicated".to_string());
        }
        let lirads = ctx.li_rads();
        if lirads.is_indeterminate() {
            flags.push(format!(
                "Indeterminate imaging ({lirads}) - biopsy may be needed"
            ));
        }
        flags
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
