//! Hepatology: liver reserve, transplant eligibility, portal hypertension.
//! Leads the board's decision.

use super::{CaseContext, PromptFrame, Specialist, SpecialistRole};
use crate::flags::transplant_criteria;
use crate::models::ChildPughClass;

pub struct Hepatologist;

impl Specialist for Hepatologist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Hepatologist
    }

    fn system_text(&self) -> &'static str {
        "You are the lead hepatologist of a hepatocellular carcinoma tumor board. \
         Ground every statement in the quoted guideline excerpts."
    }

    fn query(&self, ctx: &CaseContext) -> String {
        format!(
            "Liver function Child-Pugh {}, MELD, platelets, bilirubin. BCLC {}. \
             Treatment tolerance, transplant eligibility, portal hypertension contraindications?",
            ctx.case.clinical.child_pugh_label(),
            ctx.stage()
        )
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String {
        let clinical = &ctx.case.clinical;
        format!(
            "HEPATOLOGIST - Lead decision maker\n\n\
             PATIENT:\n{summary}\n\n\
             BCLC {stage} ({label}): {rationale}\n\
             Portal hypertension risk: {risk} (platelets {plt}K)\n\
             Transplant: {transplant}\n\n\
             {evidence}\n\n\
             PROVIDE:\n\
             1. LIVER FUNCTION ASSESSMENT (Child-Pugh {cp}, MELD {meld}, compensation)\n\
             2. TREATMENT TOLERANCE (which modalities the liver can withstand)\n\
             3. TRANSPLANT ELIGIBILITY (Milan/UCSF, bridging or downstaging)\n\
             4. PORTAL HYPERTENSION IMPLICATIONS\n\
             5. LEAD RECOMMENDATION with the supporting [SOURCE #]",
            summary = ctx.patient_summary,
            stage = ctx.stage(),
            label = ctx.staging.label,
            rationale = ctx.staging.rationale,
            risk = ctx.portal_risk(),
            plt = ctx.platelets_label(),
            transplant = transplant_criteria(&ctx.case.tumor),
            evidence = frame.grounded_evidence(
                "Focus on liver reserve, treatment tolerance and transplant candidacy"
            ),
            cp = clinical.child_pugh_label(),
            meld = clinical
                .meld
                .map_or_else(|| "n/a".to_string(), |m| format!("{m:.0}")),
        )
    }

    fn recommendations(&self, ctx: &CaseContext, _response: &str) -> Vec<String> {
        vec![
            transplant_criteria(&ctx.case.tumor),
            format!("Child-Pugh {}", ctx.case.clinical.child_pugh_label()),
            format!("Portal HTN: {}", ctx.portal_risk()),
        ]
    }

    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String> {
        let clinical = &ctx.case.clinical;
        let mut flags = clinical.lab_abnormalities.clone();

        match clinical.liver_function.class {
            Some(ChildPughClass::C) => flags.push("Child-Pugh C - very limited options".into()),
            Some(ChildPughClass::B) => {
                flags.push("Child-Pugh B - decompensated, limited treatment options".into())
            }
            _ => {}
        }
        if let Some(meld_na) = clinical.meld_na.filter(|m| *m > 20.0) {
            flags.push(format!(
                "High MELD-Na ({meld_na:.0}) - transplant evaluation needed"
            ));
        }
        let risk = ctx.portal_risk();
        if risk.is_elevated() {
            flags.push(format!(
                "{risk} portal hypertension risk - resection contraindicated"
            ));
        }
        flags
    }
}
