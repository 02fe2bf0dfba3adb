//! Surgical oncology and transplant surgery.

use super::{CaseContext, PromptFrame, Specialist, SpecialistRole};
use crate::flags::{PORTAL_HTN_PLATELETS_K, transplant_criteria};
use crate::models::{ChildPughClass, Distribution};

pub struct Surgeon;

/// Resectability verdict. Liver reserve and portal hypertension are checked
/// before tumor geometry.
pub fn resectability(ctx: &CaseContext) -> String {
    let clinical = &ctx.case.clinical;
    let tumor = &ctx.case.tumor;

    if clinical.liver_function.class != Some(ChildPughClass::A) {
        return "CONTRAINDICATED - Child-Pugh B/C".to_string();
    }
    if let Some(plt) = clinical
        .labs
        .platelets_k
        .filter(|p| *p < PORTAL_HTN_PLATELETS_K)
    {
        return format!("CONTRAINDICATED - Portal hypertension (plt {plt}K)");
    }

    let count = tumor.lesion_count();
    let max = tumor.max_diameter_cm();
    match count {
        1 if max <= 5.0 => "FEASIBLE - Single lesion ≤5cm, CP-A, no portal HTN".to_string(),
        1 => format!("BORDERLINE - Large single lesion ({max:.1}cm), requires FLR >30-40%"),
        2 | 3 if tumor.distribution() != Distribution::Bilobar => {
            "BORDERLINE - Oligonodular unilobar, assess FLR".to_string()
        }
        2 | 3 => "NOT FEASIBLE - Bilobar multifocal disease".to_string(),
        0 => "NOT APPLICABLE - No viable lesion".to_string(),
        _ => "NOT FEASIBLE - Too many lesions (>3)".to_string(),
    }
}

impl Specialist for Surgeon {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Surgeon
    }

    fn system_text(&self) -> &'static str {
        "You are a hepatobiliary and transplant surgeon on a hepatocellular carcinoma tumor \
         board. Ground every statement in the quoted guideline excerpts."
    }

    fn query(&self, ctx: &CaseContext) -> String {
        let tumor = &ctx.case.tumor;
        format!(
            "Hepatic resection criteria: {} lesion(s), max {:.1}cm, {}. Child-Pugh {}, platelets {}K. \
             BCLC {}. Future liver remnant, portal hypertension, transplant versus resection?",
            tumor.lesion_count(),
            tumor.max_diameter_cm(),
            tumor.distribution(),
            ctx.case.clinical.child_pugh_label(),
            ctx.platelets_label(),
            ctx.stage()
        )
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String {
        format!(
            "SURGEON - Resection and transplant\n\n\
             PATIENT:\n{summary}\n\n\
             BCLC {stage} ({label})\n\
             Resectability: {resect}\n\
             Transplant: {transplant}\n\n\
             {evidence}\n\n\
             PROVIDE:\n\
             1. RESECTABILITY (anatomy, future liver remnant, portal hypertension)\n\
             2. TRANSPLANT CANDIDACY (Milan/UCSF, bridging)\n\
             3. SURGICAL RISK\n\
             4. SURGICAL RECOMMENDATION with the supporting [SOURCE #]",
            summary = ctx.patient_summary,
            stage = ctx.stage(),
            label = ctx.staging.label,
            resect = resectability(ctx),
            transplant = transplant_criteria(&ctx.case.tumor),
            evidence = frame.grounded_evidence(
                "Focus on resection criteria and transplant candidacy"
            ),
        )
    }

    fn recommendations(&self, ctx: &CaseContext, _response: &str) -> Vec<String> {
        vec![resectability(ctx)]
    }

    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String> {
        let clinical = &ctx.case.clinical;
        let mut flags = clinical.lab_abnormalities.clone();
        if let Some(class) = clinical
            .liver_function
            .class
            .filter(|c| *c != ChildPughClass::A)
        {
            flags.push(format!(
                "Child-Pugh {class} - high surgical risk, resection contraindicated"
            ));
        }
        if let Some(plt) = clinical
            .labs
            .platelets_k
            .filter(|p| *p < PORTAL_HTN_PLATELETS_K)
        {
            flags.push(format!(
                "Portal hypertension (plt {plt}K) - contraindication to resection"
            ));
        }
        flags
    }
}
