//! Medical oncology. Leads for advanced disease and serves as a backup when
//! curative or locoregional options are contraindicated.

use super::{CaseContext, PromptFrame, RoleWeight, Specialist, SpecialistRole};
use crate::flags::BEVACIZUMAB_PLATELETS_K;
use crate::models::ChildPughClass;
use crate::staging::{StageCode, StageFamily};

pub struct Oncologist;

const RECOMMENDATION_MARKERS: [&str; 6] = [
    "recommend",
    "first-line",
    "primary",
    "atezolizumab",
    "lenvatinib",
    "sorafenib",
];
const MAX_RECOMMENDATIONS: usize = 5;

pub fn weight_for(stage: StageCode) -> RoleWeight {
    match stage.family() {
        StageFamily::Advanced => RoleWeight::Primary,
        StageFamily::Terminal => RoleWeight::Secondary,
        _ if stage == StageCode::B3 => RoleWeight::Secondary,
        _ => RoleWeight::Backup,
    }
}

fn role_description(weight: RoleWeight, stage: StageCode) -> String {
    match weight {
        RoleWeight::Primary => format!("PRIMARY specialist for BCLC {stage} (advanced)"),
        RoleWeight::Secondary => {
            format!("SECONDARY specialist for BCLC {stage} where locoregional options are limited")
        }
        RoleWeight::Backup => {
            "BACKUP specialist if curative/locoregional options are contraindicated".to_string()
        }
    }
}

/// Response lines that read like regimen recommendations.
pub fn extract_recommendations(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > 20)
        .filter(|line| {
            let lower = line.to_lowercase();
            RECOMMENDATION_MARKERS.iter().any(|m| lower.contains(m))
        })
        .take(MAX_RECOMMENDATIONS)
        .map(str::to_string)
        .collect()
}

impl Specialist for Oncologist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Oncologist
    }

    fn system_text(&self) -> &'static str {
        "You are a medical oncologist on a hepatocellular carcinoma tumor board. \
         Ground every statement in the quoted guideline excerpts."
    }

    fn query(&self, ctx: &CaseContext) -> String {
        let stage = ctx.stage();
        let clinical = &ctx.case.clinical;
        let cp = clinical.child_pugh_label();
        if stage.family() == StageFamily::Advanced {
            format!(
                "HCC BCLC {stage} systemic therapy. Child-Pugh {cp}, ECOG {ecog}, AFP {afp}. \
                 First-line systemic therapy options, dosing, contraindications?",
                ecog = clinical
                    .performance_status
                    .map_or_else(|| "n/a".to_string(), |p| p.to_string()),
                afp = clinical
                    .labs
                    .afp_ng_ml
                    .map_or_else(|| "n/a".to_string(), |a| format!("{a}")),
            )
        } else if stage == StageCode::B3 {
            format!(
                "HCC BCLC {stage} extensive disease. Systemic therapy versus locoregional \
                 options. Child-Pugh {cp}, {} lesions.",
                ctx.case.tumor.lesion_count()
            )
        } else {
            format!(
                "HCC BCLC {stage} when curative or locoregional options are contraindicated. \
                 Systemic therapy alternatives."
            )
        }
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String {
        let stage = ctx.stage();
        format!(
            "MEDICAL ONCOLOGIST ({role})\n\n\
             PATIENT:\n{summary}\n\n\
             BCLC {stage} ({label})\n\n\
             {evidence}\n\n\
             PROVIDE:\n\
             1. SYSTEMIC THERAPY INDICATION (primary, secondary or backup for BCLC {stage})\n\
             2. PRIMARY RECOMMENDATION (regimen and dosing as stated in the guideline)\n\
             3. ALTERNATIVES if contraindicated\n\
             4. CONTRAINDICATIONS for this patient\n\
             5. MONITORING (imaging and lab schedule, response criteria)\n\
             6. CONFIDENCE NOTE: what the guideline does not address",
            role = role_description(weight_for(stage), stage),
            summary = ctx.patient_summary,
            label = ctx.staging.label,
            evidence = frame.grounded_evidence("Focus on FIRST-LINE systemic options"),
        )
    }

    fn recommendations(&self, _ctx: &CaseContext, response: &str) -> Vec<String> {
        extract_recommendations(response)
    }

    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String> {
        let clinical = &ctx.case.clinical;
        let mut flags = clinical.lab_abnormalities.clone();
        if let Some(class @ (ChildPughClass::B | ChildPughClass::C)) = clinical.liver_function.class
        {
            flags.push(format!(
                "Decompensated cirrhosis (Child-Pugh {class}) - limited systemic therapy tolerance"
            ));
        }
        if let Some(ps) = clinical.performance_status.filter(|ps| *ps >= 2) {
            flags.push(format!(
                "Poor performance status (ECOG {ps}) - may limit systemic therapy"
            ));
        }
        if clinical
            .labs
            .platelets_k
            .is_some_and(|p| p < BEVACIZUMAB_PLATELETS_K)
        {
            flags.push("Severe thrombocytopenia - bevacizumab bleeding risk".to_string());
        }
        flags
    }

    fn role_weight(&self, ctx: &CaseContext) -> Option<RoleWeight> {
        Some(weight_for(ctx.stage()))
    }
}
