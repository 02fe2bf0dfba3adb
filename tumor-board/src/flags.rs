//! Deterministic clinical flags. Everything here is computed from lab values
//! and tumor measurements, never from generated text, so the same record
//! always yields the same flags.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Labs, TumorFindings};

pub const AFP_NORMAL: f64 = 20.0;
pub const AFP_ELEVATED: f64 = 400.0;
pub const AFP_VERY_HIGH: f64 = 1000.0;

/// Platelets below this (x10^3/uL) suggest portal hypertension.
pub const PORTAL_HTN_PLATELETS_K: f64 = 150.0;
pub const SEVERE_THROMBOCYTOPENIA_K: f64 = 100.0;
/// Below this, anti-VEGF agents carry a bleeding risk.
pub const BEVACIZUMAB_PLATELETS_K: f64 = 75.0;

/// Lab abnormalities with clinical interpretation, in a fixed order.
pub fn lab_abnormalities(labs: &Labs) -> Vec<String> {
    let mut found = Vec::new();

    if let Some(afp) = labs.afp_ng_ml {
        if afp > AFP_VERY_HIGH {
            found.push(format!("Very high AFP ({afp:.0} ng/mL) - high tumor burden"));
        } else if afp > AFP_ELEVATED {
            found.push(format!(
                "Elevated AFP ({afp:.0} ng/mL) - significant tumor burden"
            ));
        } else if afp > AFP_NORMAL {
            found.push(format!("Mildly elevated AFP ({afp:.1} ng/mL)"));
        }
    }

    if let Some(plt) = labs.platelets_k {
        if plt < SEVERE_THROMBOCYTOPENIA_K {
            found.push(format!(
                "Severe thrombocytopenia ({plt}K) - suggests significant portal hypertension"
            ));
        } else if plt < PORTAL_HTN_PLATELETS_K {
            found.push(format!(
                "Thrombocytopenia ({plt}K) - suggests portal hypertension"
            ));
        }
    }

    if let Some(bili) = labs.total_bilirubin_mg_dl {
        if bili > 3.0 {
            found.push(format!(
                "Severe hyperbilirubinemia ({bili} mg/dL) - poor prognosis"
            ));
        } else if bili > 2.0 {
            found.push(format!("Hyperbilirubinemia ({bili} mg/dL)"));
        }
    }

    if let Some(alb) = labs.albumin_g_dl {
        if alb < 2.8 {
            found.push(format!(
                "Significant hypoalbuminemia ({alb} g/dL) - poor synthetic function"
            ));
        } else if alb < 3.5 {
            found.push(format!("Hypoalbuminemia ({alb} g/dL)"));
        }
    }

    if let Some(inr) = labs.inr {
        if inr > 1.7 {
            found.push(format!("Severe coagulopathy (INR {inr})"));
        } else if inr > 1.5 {
            found.push(format!("Coagulopathy (INR {inr})"));
        }
    }

    if let Some(hgb) = labs.hemoglobin_g_dl {
        if hgb < 10.0 {
            found.push(format!("Moderate anemia (Hgb {hgb} g/dL)"));
        } else if hgb < 12.0 {
            found.push(format!("Mild anemia (Hgb {hgb} g/dL)"));
        }
    }

    if let Some(cr) = labs.creatinine_mg_dl {
        if cr > 1.5 {
            found.push(format!("Renal dysfunction (Cr {cr} mg/dL)"));
        }
    }

    if let Some(na) = labs.sodium_mmol_l {
        if na < 130.0 {
            found.push(format!("Severe hyponatremia ({na} mmol/L)"));
        } else if na < 135.0 {
            found.push(format!("Hyponatremia ({na} mmol/L)"));
        }
    }

    found
}

/// Portal hypertension risk inferred from the platelet count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortalHypertensionRisk {
    High,
    Moderate,
    Low,
}

impl PortalHypertensionRisk {
    /// A missing platelet count is treated as normal.
    pub fn from_platelets(platelets_k: Option<f64>) -> Self {
        match platelets_k {
            Some(p) if p < SEVERE_THROMBOCYTOPENIA_K => PortalHypertensionRisk::High,
            Some(p) if p < PORTAL_HTN_PLATELETS_K => PortalHypertensionRisk::Moderate,
            _ => PortalHypertensionRisk::Low,
        }
    }

    pub fn is_elevated(&self) -> bool {
        !matches!(self, PortalHypertensionRisk::Low)
    }
}

impl fmt::Display for PortalHypertensionRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PortalHypertensionRisk::High => "HIGH",
            PortalHypertensionRisk::Moderate => "MODERATE",
            PortalHypertensionRisk::Low => "LOW",
        };
        f.write_str(label)
    }
}

/// Milan: 1 lesion <= 5 cm, or up to 3 lesions each <= 3 cm.
pub fn within_milan(count: usize, max_cm: f64) -> bool {
    (count == 1 && max_cm <= 5.0) || ((1..=3).contains(&count) && max_cm <= 3.0)
}

/// UCSF: 1 lesion <= 6.5 cm, or up to 3 lesions with max <= 4.5 cm and
/// total diameter <= 8 cm.
pub fn within_ucsf(count: usize, max_cm: f64, total_cm: f64) -> bool {
    (count == 1 && max_cm <= 6.5)
        || ((1..=3).contains(&count) && max_cm <= 4.5 && total_cm <= 8.0)
}

/// Transplant-criteria verdict worded for prompts and recommendations.
pub fn transplant_criteria(tumor: &TumorFindings) -> String {
    let count = tumor.lesion_count();
    let max = tumor.max_diameter_cm();
    let total = tumor.total_diameter_cm();
    let milan = within_milan(count, max);
    let ucsf = within_ucsf(count, max, total);

    if milan && ucsf {
        format!("WITHIN MILAN & UCSF - Transplant eligible ({count} lesion(s), max {max:.1}cm)")
    } else if ucsf {
        format!(
            "WITHIN UCSF (exceeds Milan) - Consider transplant ({count} lesion(s), max {max:.1}cm)"
        )
    } else {
        format!(
            "OUTSIDE Milan/UCSF - Not standard transplant candidate ({count} lesion(s), max {max:.1}cm, total {total:.1}cm)"
        )
    }
}
