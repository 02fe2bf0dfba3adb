//! BCLC staging with intermediate and advanced sub-stages.
//!
//! [`classify`] is a pure, total function: it never fails on missing optional
//! inputs. Absent performance status or Child-Pugh data is replaced by the
//! best-case default and the substitution is returned in
//! [`StagingResult::data_quality_warnings`] and appended to the rationale.
//! Whether such records may reach the classifier at all is decided earlier by
//! the configured [`MissingDataPolicy`](crate::config::MissingDataPolicy).

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::flags::{PORTAL_HTN_PLATELETS_K, within_ucsf};
use crate::models::{ChildPughClass, ClinicalState, PathologyFindings, TumorFindings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageCode {
    #[serde(rename = "0")]
    Zero,
    A,
    B1,
    B2,
    B3,
    C1,
    C2,
    /// Performance-status driven C; needs human judgment on the cause.
    C,
    D,
    Unclassified,
}

/// Coarse grouping used by the planner's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFamily {
    VeryEarly,
    Early,
    Intermediate,
    Advanced,
    Terminal,
    Unclassified,
}

impl StageCode {
    pub fn family(&self) -> StageFamily {
        match self {
            StageCode::Zero => StageFamily::VeryEarly,
            StageCode::A => StageFamily::Early,
            StageCode::B1 | StageCode::B2 | StageCode::B3 => StageFamily::Intermediate,
            StageCode::C1 | StageCode::C2 | StageCode::C => StageFamily::Advanced,
            StageCode::D => StageFamily::Terminal,
            StageCode::Unclassified => StageFamily::Unclassified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageCode::Zero => "0",
            StageCode::A => "A",
            StageCode::B1 => "B1",
            StageCode::B2 => "B2",
            StageCode::B3 => "B3",
            StageCode::C1 => "C1",
            StageCode::C2 => "C2",
            StageCode::C => "C",
            StageCode::D => "D",
            StageCode::Unclassified => "Unclassified",
        }
    }

    /// Human label, e.g. "B1 (Transplant Candidate)".
    pub fn label(&self) -> &'static str {
        match self {
            StageCode::Zero => "0 (Very Early)",
            StageCode::A => "A (Early)",
            StageCode::B1 => "B1 (Transplant Candidate)",
            StageCode::B2 => "B2 (Standard Intermediate)",
            StageCode::B3 => "B3 (Extensive Disease)",
            StageCode::C1 => "C1 (PVTT/Vascular Invasion)",
            StageCode::C2 => "C2 (Extrahepatic Spread)",
            StageCode::C => "C (Performance Status Driven)",
            StageCode::D => "D (Terminal)",
            StageCode::Unclassified => "Unclassified",
        }
    }

    pub fn treatment_intent(&self) -> TreatmentIntent {
        match self.family() {
            StageFamily::VeryEarly | StageFamily::Early => TreatmentIntent::Curative,
            StageFamily::Intermediate => TreatmentIntent::Locoregional,
            StageFamily::Advanced => TreatmentIntent::Systemic,
            StageFamily::Terminal | StageFamily::Unclassified => TreatmentIntent::Palliative,
        }
    }
}

impl fmt::Display for StageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TreatmentIntent {
    Curative,
    Locoregional,
    Systemic,
    Palliative,
}

impl fmt::Display for TreatmentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TreatmentIntent::Curative => "CURATIVE",
            TreatmentIntent::Locoregional => "LOCOREGIONAL",
            TreatmentIntent::Systemic => "SYSTEMIC",
            TreatmentIntent::Palliative => "PALLIATIVE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingResult {
    pub stage: StageCode,
    pub label: String,
    pub rationale: String,
    pub substage_guidance: String,
    pub treatment_intent: TreatmentIntent,
    /// Platelets below 150k.
    pub portal_hypertension: bool,
    pub decompensated: bool,
    /// ECOG and Child-Pugh as staged, after default substitution.
    pub performance_status: u8,
    pub child_pugh_class: ChildPughClass,
    pub child_pugh_score: u8,
    pub data_quality_warnings: Vec<String>,
}

/// Inputs after default substitution.
struct Resolved {
    ps: u8,
    cp_class: ChildPughClass,
    cp_score: u8,
    platelets: Option<f64>,
    portal_htn: bool,
    decompensated: bool,
    warnings: Vec<String>,
}

fn resolve(clinical: &ClinicalState) -> Resolved {
    let mut warnings = Vec::new();

    let ps = clinical.performance_status.unwrap_or_else(|| {
        warnings.push("ECOG performance status missing; defaulted to 0".to_string());
        0
    });
    let cp_score = clinical.liver_function.score.unwrap_or_else(|| {
        warnings.push("Child-Pugh score missing; defaulted to 5".to_string());
        5
    });
    let cp_class = clinical.liver_function.class.unwrap_or_else(|| {
        warnings.push("Child-Pugh class missing; defaulted to A".to_string());
        ChildPughClass::A
    });

    for w in &warnings {
        warn!(warning = %w, "staging input defaulted");
    }

    let platelets = clinical.labs.platelets_k;
    let decompensated =
        matches!(cp_class, ChildPughClass::B | ChildPughClass::C) || clinical.is_decompensated();

    Resolved {
        ps,
        cp_class,
        cp_score,
        platelets,
        portal_htn: platelets.is_some_and(|p| p < PORTAL_HTN_PLATELETS_K),
        decompensated,
        warnings,
    }
}

/// Classify one patient. First matching branch wins: terminal, advanced,
/// intermediate, curative, then unclassified.
pub fn classify(
    clinical: &ClinicalState,
    tumor: &TumorFindings,
    pathology: &PathologyFindings,
) -> StagingResult {
    let r = resolve(clinical);
    let (stage, rationale, guidance) = decide(&r, tumor, pathology);

    let mut rationale = rationale;
    if !r.warnings.is_empty() {
        rationale.push_str(&format!(
            " Data-quality warning: {}.",
            r.warnings.join("; ")
        ));
    }

    StagingResult {
        stage,
        label: stage.label().to_string(),
        rationale,
        substage_guidance: guidance,
        treatment_intent: stage.treatment_intent(),
        portal_hypertension: r.portal_htn,
        decompensated: r.decompensated,
        performance_status: r.ps,
        child_pugh_class: r.cp_class,
        child_pugh_score: r.cp_score,
        data_quality_warnings: r.warnings,
    }
}

fn decide(
    r: &Resolved,
    tumor: &TumorFindings,
    pathology: &PathologyFindings,
) -> (StageCode, String, String) {
    let ps = r.ps;
    let cp = r.cp_class;

    if ps > 2 || cp == ChildPughClass::C {
        let trigger = if ps > 2 {
            format!("ECOG PS {ps}")
        } else {
            format!("Child-Pugh {cp}")
        };
        return (
            StageCode::D,
            format!("{trigger} indicates terminal stage per BCLC criteria."),
            "Best supportive care recommended due to poor functional status or end-stage liver \
             disease. Palliative interventions only."
                .to_string(),
        );
    }

    let pvtt = tumor.has_portal_vein_thrombus();
    let extrahepatic = tumor.has_extrahepatic_metastasis();
    let vascular_invasion = pathology.has_vascular_invasion();

    if pvtt || extrahepatic || vascular_invasion || ps >= 1 {
        return if extrahepatic {
            (
                StageCode::C2,
                "Presence of extrahepatic metastasis categorizes as BCLC C2.".to_string(),
                "Systemic therapy indicated. First-line: Atezolizumab-Bevacizumab. Alternatives: \
                 Sorafenib, Lenvatinib, Durvalumab-Tremelimumab."
                    .to_string(),
            )
        } else if pvtt || vascular_invasion {
            (
                StageCode::C1,
                format!(
                    "Portal vein tumor thrombosis (PVTT={pvtt}) or macrovascular invasion \
                     (histologic={vascular_invasion}) without extrahepatic spread."
                ),
                "Consider Y90-TARE for PVTT or systemic therapy. Sorafenib has shown benefit in \
                 PVTT cases."
                    .to_string(),
            )
        } else {
            (
                StageCode::C,
                format!(
                    "ECOG PS {ps} categorizes as Stage C. CRITICAL CLINICAL JUDGMENT NEEDED: assess \
                     whether PS impairment is due to HCC (Stage C systemic therapy) or comorbidities \
                     (may still be candidate for locoregional therapy as Stage A/B)."
                ),
                format!(
                    "If PS {ps} is from HCC: systemic therapy (Atezolizumab-Bevacizumab). If PS {ps} \
                     is from comorbidities and liver function preserved: may still be candidate for \
                     locoregional therapy (Stage A/B). Requires multidisciplinary assessment."
                ),
            )
        };
    }

    let count = tumor.lesion_count();
    let max = tumor.max_diameter_cm();
    let total = tumor.total_diameter_cm();

    if count > 1 && ps == 0 {
        return if within_ucsf(count, max, total) {
            (
                StageCode::B1,
                format!(
                    "Multifocal disease within UCSF criteria ({count} lesions, max {max:.1}cm, \
                     total {total:.1}cm), PS 0, CP {cp}."
                ),
                "Consider liver transplantation if meets institutional criteria. May bridge with \
                 TACE/TARE. Alternative: TACE if transplant not feasible."
                    .to_string(),
            )
        } else if count > 3 || max > 5.0 {
            (
                StageCode::B3,
                format!(
                    "Extensive multifocal disease ({count} lesions, max {max:.1}cm exceeds B1/B2 \
                     criteria), PS 0."
                ),
                "Consider Y90-TARE or systemic therapy. TACE may have limited efficacy with \
                 extensive disease. Clinical trial enrollment encouraged."
                    .to_string(),
            )
        } else {
            (
                StageCode::B2,
                format!("Multifocal disease ({count} lesions, max {max:.1}cm), PS 0, CP {cp}."),
                "TACE is first-line for BCLC B2. Consider Y90-TARE as alternative. Monitor for \
                 TACE progression."
                    .to_string(),
            )
        };
    }

    // Reaching here means no thrombus, metastasis or vascular invasion.
    if count == 0 {
        return (
            StageCode::Unclassified,
            "Insufficient data for accurate staging: no viable lesion in baseline imaging."
                .to_string(),
            "Requires additional clinical, imaging, or pathology information for BCLC staging."
                .to_string(),
        );
    }

    let plt = r
        .platelets
        .map_or_else(|| "n/a".to_string(), |p| format!("{p}"));

    if count == 1 {
        if max < 2.0 {
            let guidance = if r.portal_htn {
                format!(
                    "Ablation (RFA/MWA) first-line recommended (portal HTN present: platelets \
                     {plt}K). Resection contraindicated due to portal hypertension. Consider \
                     surveillance if <1cm."
                )
            } else if r.decompensated {
                "Transplant evaluation recommended for decompensated cirrhosis. Ablation as bridge \
                 to transplant. Resection only if excellent liver function."
                    .to_string()
            } else {
                "Ablation (RFA/MWA) first-line if no portal hypertension. Resection if excellent \
                 liver function and no portal HTN. Consider surveillance if <1cm."
                    .to_string()
            };
            return (
                StageCode::Zero,
                format!("Single lesion <2cm ({max:.1}cm), PS 0, CP {cp}."),
                guidance,
            );
        }

        if max <= 5.0 {
            let guidance = if r.portal_htn {
                format!(
                    "Ablation (RFA/MWA) first-line recommended (portal HTN present: platelets \
                     {plt}K). Resection contraindicated due to portal hypertension. Transplant if \
                     decompensated. TACE alternative if ablation not feasible."
                )
            } else if r.decompensated {
                "Transplant first-line for decompensated cirrhosis. Ablation or TACE as bridge to \
                 transplant. Resection only if liver function improves."
                    .to_string()
            } else {
                format!(
                    "Resection first-line if no portal hypertension and adequate FLR. Ablation \
                     (RFA/MWA) if {max:.1}cm <=3cm or unresectable. Transplant if meets Milan \
                     criteria. TACE if ablation not feasible."
                )
            };
            return (
                StageCode::A,
                format!("Single lesion {max:.1}cm, PS 0, CP {cp}."),
                guidance,
            );
        }

        let guidance = if r.portal_htn {
            format!(
                "TACE first-line for large lesion with portal HTN (platelets {plt}K). Resection \
                 contraindicated. Consider Y90-TARE. Transplant if downstaging successful."
            )
        } else if r.decompensated {
            "Transplant evaluation after downstaging with TACE. Resection only if liver function \
             excellent and no portal HTN."
                .to_string()
        } else {
            "Resection if adequate FLR (>30-40%) and no portal HTN. TACE for downstaging if \
             borderline resectable. Consider Y90-TARE as alternative."
                .to_string()
        };
        return (
            StageCode::A,
            format!("Large single lesion {max:.1}cm, PS 0, CP {cp}."),
            guidance,
        );
    }

    // Multiple lesions only reach this point with PS > 0, which the advanced
    // branch already claimed; kept total for direct callers.
    if count <= 3 && max <= 3.0 {
        let guidance = if r.portal_htn {
            format!(
                "Ablation (RFA/MWA) first-line for up to 3 lesions <=3cm (portal HTN present: \
                 platelets {plt}K). Resection contraindicated. Transplant if meets Milan criteria."
            )
        } else if r.decompensated {
            "Transplant first-line for decompensated cirrhosis within Milan criteria. Ablation as \
             bridge to transplant."
                .to_string()
        } else {
            format!(
                "Ablation (RFA/MWA) preferred for {count} lesions <=3cm. Resection if favorable \
                 anatomy and no portal HTN. Transplant if meets Milan criteria."
            )
        };
        return (
            StageCode::A,
            format!("Oligonodular disease ({count} lesions <=3cm), PS 0, CP {cp}, within Milan."),
            guidance,
        );
    }

    let guidance = if r.portal_htn {
        format!(
            "TACE first-line for multifocal disease with portal HTN (platelets {plt}K). Resection \
             contraindicated. Consider Y90-TARE."
        )
    } else {
        "Assess resectability: if all lesions in single sector and adequate FLR, resection. \
         Otherwise TACE or Y90-TARE. Consider transplant if downstaging successful."
            .to_string()
    };
    (
        StageCode::A,
        format!("Limited multifocal disease ({count} lesions), PS 0, CP {cp}."),
        guidance,
    )
}
