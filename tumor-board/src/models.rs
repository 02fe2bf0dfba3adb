//! Patient-record input shapes and the normalized clinical state derived from
//! them. The record provider hands these over already parsed; nothing here
//! interprets free text.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw record, as supplied by the patient record provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub clinical_summary: Option<ClinicalSummary>,
    #[serde(default)]
    pub radiology_summary: Option<RadiologySummary>,
    #[serde(default)]
    pub pathology_summary: PathologySummary,
    /// Prior tumor-board discussion. Kept for evaluation, never used as input.
    #[serde(default)]
    pub notes_summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicalSummary {
    #[serde(default)]
    pub etiology: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(rename = "ECOG", default)]
    pub ecog: Option<u8>,
    #[serde(default)]
    pub ascites: Option<String>,
    #[serde(default)]
    pub encephalopathy: Option<String>,
    #[serde(default)]
    pub derived_scores: Option<DerivedScores>,
    #[serde(default)]
    pub labs_baseline: Option<Labs>,
    /// Longitudinal lab series. Dropped before staging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labs_time_series: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedScores {
    #[serde(rename = "Child_Pugh", default)]
    pub child_pugh: Option<ChildPugh>,
    #[serde(rename = "MELD", default)]
    pub meld: Option<f64>,
    #[serde(rename = "MELD_Na", default)]
    pub meld_na: Option<f64>,
    #[serde(rename = "ALBI", default)]
    pub albi: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildPugh {
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub class: Option<ChildPughClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildPughClass {
    A,
    B,
    C,
}

impl fmt::Display for ChildPughClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            ChildPughClass::A => "A",
            ChildPughClass::B => "B",
            ChildPughClass::C => "C",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Labs {
    #[serde(rename = "AFP_ng_ml", default)]
    pub afp_ng_ml: Option<f64>,
    #[serde(default)]
    pub platelets_k: Option<f64>,
    #[serde(default)]
    pub total_bilirubin_mg_dl: Option<f64>,
    #[serde(default)]
    pub albumin_g_dl: Option<f64>,
    #[serde(rename = "INR", default)]
    pub inr: Option<f64>,
    #[serde(default)]
    pub hemoglobin_g_dl: Option<f64>,
    #[serde(default)]
    pub creatinine_mg_dl: Option<f64>,
    #[serde(rename = "Na_mmol_L", default)]
    pub sodium_mmol_l: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadiologySummary {
    #[serde(default)]
    pub studies: Vec<ImagingStudy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagingStudy {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub overall_derived_li_rads: Option<String>,
    #[serde(default)]
    pub lesions: Vec<LesionInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LesionInput {
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub size_cm: Option<LesionSize>,
    #[serde(default)]
    pub pvtt: bool,
    #[serde(default)]
    pub extrahepatic_metastasis: bool,
    #[serde(default)]
    pub vascular_invasion: bool,
    #[serde(default)]
    pub treated: bool,
    #[serde(default)]
    pub derived_li_rads: Option<String>,
    #[serde(default)]
    pub ground_truth_li_rads: Option<String>,
}

/// Lesion size arrives either as a bare number or as a measurement object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LesionSize {
    Measured { longest_diameter_cm: f64 },
    Plain(f64),
}

impl LesionSize {
    pub fn longest_cm(&self) -> f64 {
        match self {
            LesionSize::Measured {
                longest_diameter_cm,
            } => *longest_diameter_cm,
            LesionSize::Plain(cm) => *cm,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathologySummary {
    #[serde(default)]
    pub biopsy_performed: bool,
    #[serde(default)]
    pub histology: Histology,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Histology {
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub differentiation: Option<String>,
    #[serde(default)]
    pub vascular_invasion: Option<bool>,
}

// ---------------------------------------------------------------------------
// Normalized state consumed by the staging classifier and the specialists
// ---------------------------------------------------------------------------

/// LI-RADS imaging certainty category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LiRads {
    #[serde(rename = "LR-1")]
    Lr1,
    #[serde(rename = "LR-2")]
    Lr2,
    #[serde(rename = "LR-3")]
    Lr3,
    #[serde(rename = "LR-4")]
    Lr4,
    #[serde(rename = "LR-5")]
    Lr5,
    #[serde(rename = "LR-M")]
    LrM,
    #[serde(rename = "LR-TIV")]
    LrTiv,
    Unknown,
}

impl LiRads {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_ascii_uppercase()
            .chars()
            .filter(|c| !matches!(c, '-' | ' ' | '_'))
            .collect();
        match normalized.trim_start_matches("LIRADS") {
            "LR1" | "1" => LiRads::Lr1,
            "LR2" | "2" => LiRads::Lr2,
            "LR3" | "3" => LiRads::Lr3,
            "LR4" | "4" => LiRads::Lr4,
            "LR5" | "5" => LiRads::Lr5,
            "LRM" | "M" => LiRads::LrM,
            "LRTIV" | "TIV" => LiRads::LrTiv,
            _ => LiRads::Unknown,
        }
    }

    /// LR-3 and LR-4 leave the diagnosis open.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, LiRads::Lr3 | LiRads::Lr4)
    }

    /// LR-5 is definitive for HCC; no tissue diagnosis is required.
    pub fn is_definitive(&self) -> bool {
        matches!(self, LiRads::Lr5)
    }
}

impl fmt::Display for LiRads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LiRads::Lr1 => "LR-1",
            LiRads::Lr2 => "LR-2",
            LiRads::Lr3 => "LR-3",
            LiRads::Lr4 => "LR-4",
            LiRads::Lr5 => "LR-5",
            LiRads::LrM => "LR-M",
            LiRads::LrTiv => "LR-TIV",
            LiRads::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiverFunction {
    pub score: Option<u8>,
    pub class: Option<ChildPughClass>,
}

/// Immutable clinical snapshot for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalState {
    pub etiology: Option<String>,
    pub symptoms: Vec<String>,
    /// ECOG performance status, 0-4.
    pub performance_status: Option<u8>,
    pub liver_function: LiverFunction,
    pub meld: Option<f64>,
    pub meld_na: Option<f64>,
    pub labs: Labs,
    pub ascites: bool,
    pub encephalopathy: bool,
    /// Deterministic lab abnormality descriptions.
    pub lab_abnormalities: Vec<String>,
}

impl ClinicalState {
    /// Class B/C or any active ascites/encephalopathy.
    pub fn is_decompensated(&self) -> bool {
        matches!(
            self.liver_function.class,
            Some(ChildPughClass::B) | Some(ChildPughClass::C)
        ) || self.ascites
            || self.encephalopathy
    }

    pub fn compensation_status(&self) -> &'static str {
        if self.is_decompensated() {
            "DECOMPENSATED"
        } else {
            "COMPENSATED"
        }
    }

    /// "A5", "B?" or "unknown" for prompts and summaries.
    pub fn child_pugh_label(&self) -> String {
        match (self.liver_function.class, self.liver_function.score) {
            (Some(class), Some(score)) => format!("{class}{score}"),
            (Some(class), None) => format!("{class}?"),
            _ => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LesionRecord {
    pub size_cm: f64,
    pub segment: Option<String>,
    pub vascular_invasion: bool,
    pub portal_vein_thrombus: bool,
    pub extrahepatic_metastasis: bool,
    pub treated: bool,
    pub certainty: LiRads,
}

impl LesionRecord {
    pub fn describe(&self) -> String {
        let segment = self.segment.as_deref().unwrap_or("?");
        let pvtt = if self.portal_vein_thrombus {
            " +PVTT"
        } else {
            ""
        };
        format!(
            "{:.1}cm segment {} (LI-RADS {}){}",
            self.size_cm, segment, self.certainty, pvtt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Unilobar,
    Bilobar,
    Unknown,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Distribution::Unilobar => "unilobar",
            Distribution::Bilobar => "bilobar",
            Distribution::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Lesions of the baseline imaging study only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TumorFindings {
    pub modality: Option<String>,
    pub overall_certainty: Option<LiRads>,
    pub lesions: Vec<LesionRecord>,
}

impl TumorFindings {
    /// Untreated lesions; the only ones that count toward staging.
    pub fn viable(&self) -> impl Iterator<Item = &LesionRecord> {
        self.lesions.iter().filter(|l| !l.treated)
    }

    pub fn lesion_count(&self) -> usize {
        self.viable().count()
    }

    pub fn max_diameter_cm(&self) -> f64 {
        self.viable().map(|l| l.size_cm).fold(0.0, f64::max)
    }

    pub fn total_diameter_cm(&self) -> f64 {
        self.viable().map(|l| l.size_cm).sum()
    }

    pub fn distribution(&self) -> Distribution {
        let segments: BTreeSet<&str> = self
            .viable()
            .filter_map(|l| l.segment.as_deref())
            .filter(|s| !s.is_empty() && *s != "?")
            .collect();
        if self.lesion_count() == 0 {
            Distribution::Unknown
        } else if segments.len() <= 1 {
            Distribution::Unilobar
        } else {
            Distribution::Bilobar
        }
    }

    pub fn has_portal_vein_thrombus(&self) -> bool {
        self.viable().any(|l| l.portal_vein_thrombus)
    }

    pub fn has_extrahepatic_metastasis(&self) -> bool {
        self.viable().any(|l| l.extrahepatic_metastasis)
    }

    pub fn has_radiologic_vascular_invasion(&self) -> bool {
        self.viable().any(|l| l.vascular_invasion)
    }

    /// Study-level category, falling back to the most suspicious lesion.
    pub fn certainty(&self) -> LiRads {
        self.overall_certainty
            .filter(|c| *c != LiRads::Unknown)
            .or_else(|| {
                self.viable()
                    .map(|l| l.certainty)
                    .filter(|c| *c != LiRads::Unknown && *c != LiRads::LrM && *c != LiRads::LrTiv)
                    .max()
            })
            .unwrap_or(LiRads::Unknown)
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.viable().map(LesionRecord::describe).collect()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} lesion(s), max {:.1}cm, {}",
            self.lesion_count(),
            self.max_diameter_cm(),
            self.distribution()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathologyFindings {
    pub biopsy_performed: bool,
    pub diagnosis: Option<String>,
    pub differentiation: Option<String>,
    pub vascular_invasion: Option<bool>,
}

impl PathologyFindings {
    pub fn has_vascular_invasion(&self) -> bool {
        self.vascular_invasion.unwrap_or(false)
    }

    pub fn is_poorly_differentiated(&self) -> bool {
        self.differentiation
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains("poor"))
    }
}

/// Everything one run needs about the patient, built once by the normalize
/// stage and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCase {
    pub patient_id: Option<String>,
    pub clinical: ClinicalState,
    pub tumor: TumorFindings,
    pub pathology: PathologyFindings,
    /// Notes on what was dropped or missing during normalization.
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesion(size: f64, segment: &str) -> LesionRecord {
        LesionRecord {
            size_cm: size,
            segment: Some(segment.to_string()),
            vascular_invasion: false,
            portal_vein_thrombus: false,
            extrahepatic_metastasis: false,
            treated: false,
            certainty: LiRads::Lr5,
        }
    }

    #[test]
    fn li_rads_parses_common_spellings() {
        assert_eq!(LiRads::parse("LR-5"), LiRads::Lr5);
        assert_eq!(LiRads::parse("lr 4"), LiRads::Lr4);
        assert_eq!(LiRads::parse("LI-RADS 3"), LiRads::Lr3);
        assert_eq!(LiRads::parse("LR-TIV"), LiRads::LrTiv);
        assert_eq!(LiRads::parse("n/a"), LiRads::Unknown);
        assert!(LiRads::Lr4.is_indeterminate());
        assert!(!LiRads::Lr5.is_indeterminate());
    }

    #[test]
    fn aggregates_ignore_treated_lesions() {
        let mut treated = lesion(7.0, "8");
        treated.treated = true;
        let findings = TumorFindings {
            modality: Some("CT".into()),
            overall_certainty: None,
            lesions: vec![lesion(3.0, "6"), lesion(2.0, "7"), treated],
        };

        assert_eq!(findings.lesion_count(), 2);
        assert_eq!(findings.max_diameter_cm(), 3.0);
        assert_eq!(findings.total_diameter_cm(), 5.0);
        assert_eq!(findings.distribution(), Distribution::Bilobar);
        assert_eq!(findings.certainty(), LiRads::Lr5);
    }

    #[test]
    fn lesion_size_accepts_both_shapes() {
        let plain: LesionInput = serde_json::from_str(r#"{"size_cm": 2.5}"#).unwrap();
        let measured: LesionInput =
            serde_json::from_str(r#"{"size_cm": {"longest_diameter_cm": 4.1}}"#).unwrap();
        assert_eq!(plain.size_cm.unwrap().longest_cm(), 2.5);
        assert_eq!(measured.size_cm.unwrap().longest_cm(), 4.1);
    }

    #[test]
    fn decompensation_follows_class_and_symptoms() {
        let mut state = ClinicalState {
            liver_function: LiverFunction {
                score: Some(5),
                class: Some(ChildPughClass::A),
            },
            ..Default::default()
        };
        assert!(!state.is_decompensated());
        assert_eq!(state.child_pugh_label(), "A5");

        state.ascites = true;
        assert!(state.is_decompensated());
        assert_eq!(state.compensation_status(), "DECOMPENSATED");
    }
}
