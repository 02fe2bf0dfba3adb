//! First pipeline stage: validate the record, keep only the baseline imaging
//! study, drop longitudinal labs and prior board notes, and build the
//! immutable [`NormalizedCase`] every later stage reads.

use tracing::{info, warn};

use crate::config::MissingDataPolicy;
use crate::error::ValidationError;
use crate::flags::lab_abnormalities;
use crate::models::{
    ClinicalState, ClinicalSummary, LesionInput, LesionRecord, LiRads, LiverFunction,
    NormalizedCase, PathologyFindings, PatientRecord, TumorFindings,
};

/// Check that the record carries what staging needs.
///
/// Returns non-fatal warnings on success. ECOG and Child-Pugh are only
/// required under [`MissingDataPolicy::Reject`]; otherwise the classifier
/// substitutes defaults and records that it did.
pub fn validate(
    record: &PatientRecord,
    policy: MissingDataPolicy,
) -> Result<Vec<String>, ValidationError> {
    let clinical = record
        .clinical_summary
        .as_ref()
        .ok_or_else(|| ValidationError("missing clinical_summary".into()))?;
    let radiology = record
        .radiology_summary
        .as_ref()
        .ok_or_else(|| ValidationError("missing radiology_summary".into()))?;

    if clinical.labs_baseline.is_none() {
        return Err(ValidationError("missing labs_baseline".into()));
    }

    if policy == MissingDataPolicy::Reject {
        let child_pugh = clinical
            .derived_scores
            .as_ref()
            .and_then(|s| s.child_pugh.as_ref());
        match child_pugh {
            None => return Err(ValidationError("missing Child_Pugh in derived_scores".into())),
            Some(cp) if cp.class.is_none() || cp.score.is_none() => {
                return Err(ValidationError(
                    "Child_Pugh class and score are both required".into(),
                ));
            }
            Some(_) => {}
        }
        if clinical.ecog.is_none() {
            return Err(ValidationError("missing ECOG performance status".into()));
        }
    }

    if let Some(ecog) = clinical.ecog {
        if ecog > 4 {
            return Err(ValidationError(format!(
                "ECOG performance status must be 0-4, got {ecog}"
            )));
        }
    }

    let baseline = radiology
        .studies
        .first()
        .ok_or_else(|| ValidationError("missing imaging studies".into()))?;
    if baseline.lesions.is_empty() {
        return Err(ValidationError("no lesions in baseline imaging".into()));
    }

    let mut warnings = Vec::new();
    let has_li_rads = baseline
        .lesions
        .iter()
        .any(|l| l.derived_li_rads.is_some() || l.ground_truth_li_rads.is_some());
    if !has_li_rads && baseline.overall_derived_li_rads.is_none() {
        warn!("no LI-RADS category on any baseline lesion");
        warnings.push(
            "No LI-RADS classification found - may need biopsy confirmation".to_string(),
        );
    }

    Ok(warnings)
}

/// Build the normalized snapshot. Total over any record; call [`validate`]
/// first to refuse records that cannot be staged.
pub fn normalize(record: &PatientRecord) -> NormalizedCase {
    let mut notes = Vec::new();
    let clinical = record.clinical_summary.clone().unwrap_or_default();

    if clinical.labs_time_series.is_some() {
        notes.push("Longitudinal lab series dropped from staging input".to_string());
    }
    if record.notes_summary.is_some() {
        info!("ignoring prior tumor-board notes");
        notes.push("Prior tumor-board notes ignored".to_string());
    }

    let studies = record
        .radiology_summary
        .as_ref()
        .map(|r| r.studies.as_slice())
        .unwrap_or_default();
    if studies.len() > 1 {
        info!(
            dropped = studies.len() - 1,
            "keeping baseline imaging study only"
        );
        notes.push(format!(
            "{} follow-up imaging stud{} excluded; baseline only",
            studies.len() - 1,
            if studies.len() == 2 { "y" } else { "ies" }
        ));
    }

    let tumor = match studies.first() {
        Some(baseline) => TumorFindings {
            modality: baseline.modality.clone(),
            overall_certainty: baseline.overall_derived_li_rads.as_deref().map(LiRads::parse),
            lesions: baseline.lesions.iter().map(lesion_record).collect(),
        },
        None => TumorFindings::default(),
    };

    let treated = tumor.lesions.iter().filter(|l| l.treated).count();
    if treated > 0 {
        notes.push(format!("{treated} treated lesion(s) excluded from viable burden"));
    }

    let histology = &record.pathology_summary.histology;
    let pathology = PathologyFindings {
        biopsy_performed: record.pathology_summary.biopsy_performed,
        diagnosis: histology.diagnosis.clone(),
        differentiation: histology.differentiation.clone(),
        vascular_invasion: histology.vascular_invasion,
    };

    NormalizedCase {
        patient_id: record.patient_id.clone(),
        clinical: clinical_state(&clinical),
        tumor,
        pathology,
        notes,
    }
}

fn clinical_state(clinical: &ClinicalSummary) -> ClinicalState {
    let scores = clinical.derived_scores.clone().unwrap_or_default();
    let child_pugh = scores.child_pugh.unwrap_or_default();
    let labs = clinical.labs_baseline.clone().unwrap_or_default();

    ClinicalState {
        etiology: clinical.etiology.clone(),
        symptoms: clinical.symptoms.clone(),
        performance_status: clinical.ecog,
        liver_function: LiverFunction {
            score: child_pugh.score,
            class: child_pugh.class,
        },
        meld: scores.meld,
        meld_na: scores.meld_na,
        lab_abnormalities: lab_abnormalities(&labs),
        labs,
        ascites: is_present(clinical.ascites.as_deref()),
        encephalopathy: is_present(clinical.encephalopathy.as_deref()),
    }
}

/// "none"/"absent" (or nothing at all) means the complication is not active.
fn is_present(finding: Option<&str>) -> bool {
    finding
        .map(|f| f.trim().to_ascii_lowercase())
        .is_some_and(|f| !f.is_empty() && f != "none" && f != "absent")
}

fn lesion_record(lesion: &LesionInput) -> LesionRecord {
    let certainty = lesion
        .derived_li_rads
        .as_deref()
        .or(lesion.ground_truth_li_rads.as_deref())
        .map(LiRads::parse)
        .unwrap_or(LiRads::Unknown);

    LesionRecord {
        size_cm: lesion.size_cm.map(|s| s.longest_cm()).unwrap_or(0.0),
        segment: lesion.segment.clone(),
        vascular_invasion: lesion.vascular_invasion,
        portal_vein_thrombus: lesion.pvtt,
        extrahepatic_metastasis: lesion.extrahepatic_metastasis,
        treated: lesion.treated,
        certainty,
    }
}

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v}"))
}

/// Compact patient block embedded in every prompt.
pub fn concise_patient_summary(case: &NormalizedCase) -> String {
    let c = &case.clinical;
    let symptoms = if c.symptoms.is_empty() {
        "None".to_string()
    } else {
        c.symptoms.join(", ")
    };
    let ecog = c
        .performance_status
        .map_or_else(|| "n/a".to_string(), |p| p.to_string());
    let afp = c
        .labs
        .afp_ng_ml
        .map_or_else(|| "n/a".to_string(), |a| format!("{a:.1}"));
    let abnormalities = if c.lab_abnormalities.is_empty() {
        "None critical".to_string()
    } else {
        c.lab_abnormalities.join("; ")
    };

    format!(
        "PATIENT: {etiology}\n\
         LIVER STATUS: {status} cirrhosis\n\
         SYMPTOMS: {symptoms}\n\
         ECOG: {ecog} | Child-Pugh: {cp} | MELD: {meld} | MELD-Na: {meld_na}\n\
         TUMOR: {tumor}\n\
         KEY LABS: AFP {afp}, Bili {bili}, Alb {alb}, Plt {plt}K, INR {inr}\n\
         ABNORMALITIES: {abnormalities}",
        etiology = c.etiology.as_deref().unwrap_or("Unknown etiology"),
        status = c.compensation_status(),
        cp = c.child_pugh_label(),
        meld = opt(c.meld),
        meld_na = opt(c.meld_na),
        tumor = case.tumor.summary_line(),
        bili = opt(c.labs.total_bilirubin_mg_dl),
        alb = opt(c.labs.albumin_g_dl),
        plt = opt(c.labs.platelets_k),
        inr = opt(c.labs.inr),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> PatientRecord {
        serde_json::from_value(json!({
            "patient_id": "P-001",
            "clinical_summary": {
                "etiology": "HBV",
                "symptoms": ["fatigue"],
                "ECOG": 0,
                "ascites": "none",
                "encephalopathy": "absent",
                "derived_scores": {"Child_Pugh": {"score": 5, "class": "A"}, "MELD": 8, "MELD_Na": 9},
                "labs_baseline": {"AFP_ng_ml": 35.0, "platelets_k": 180, "total_bilirubin_mg_dl": 0.9,
                                  "albumin_g_dl": 4.0, "INR": 1.1},
                "labs_time_series": [{"date": "2024-01-01"}]
            },
            "radiology_summary": {"studies": [
                {"modality": "MRI", "lesions": [
                    {"segment": "6", "size_cm": {"longest_diameter_cm": 3.0}, "derived_li_rads": "LR-5"},
                    {"segment": "7", "size_cm": 1.5, "treated": true, "derived_li_rads": "LR-5"}
                ]},
                {"modality": "CT", "lesions": [{"segment": "6", "size_cm": 1.0}]}
            ]},
            "notes_summary": {"decision": "TACE"}
        }))
        .unwrap()
    }

    #[test]
    fn keeps_baseline_only_and_records_what_was_dropped() {
        let case = normalize(&record());
        assert_eq!(case.tumor.modality.as_deref(), Some("MRI"));
        assert_eq!(case.tumor.lesions.len(), 2);
        assert_eq!(case.tumor.lesion_count(), 1);
        assert_eq!(case.tumor.max_diameter_cm(), 3.0);
        assert_eq!(case.notes.len(), 4);
        assert!(case.notes.iter().any(|n| n.contains("follow-up imaging study")));
    }

    #[test]
    fn clinical_state_is_derived_from_summary() {
        let case = normalize(&record());
        let c = &case.clinical;
        assert_eq!(c.performance_status, Some(0));
        assert!(!c.ascites);
        assert!(!c.encephalopathy);
        assert_eq!(c.child_pugh_label(), "A5");
        assert_eq!(c.lab_abnormalities, vec!["Mildly elevated AFP (35.0 ng/mL)"]);
    }

    #[test]
    fn validation_requires_baseline_lesions() {
        let mut r = record();
        r.radiology_summary.as_mut().unwrap().studies[0].lesions.clear();
        let err = validate(&r, MissingDataPolicy::SubstituteDefaults).unwrap_err();
        assert!(err.0.contains("no lesions"));
    }

    #[test]
    fn missing_ecog_only_fails_under_reject_policy() {
        let mut r = record();
        r.clinical_summary.as_mut().unwrap().ecog = None;
        assert!(validate(&r, MissingDataPolicy::SubstituteDefaults).is_ok());
        assert!(validate(&r, MissingDataPolicy::Reject).is_err());
    }

    #[test]
    fn missing_li_rads_is_a_warning() {
        let mut r = record();
        for lesion in &mut r.radiology_summary.as_mut().unwrap().studies[0].lesions {
            lesion.derived_li_rads = None;
        }
        let warnings = validate(&r, MissingDataPolicy::SubstituteDefaults).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn summary_renders_missing_values() {
        let mut case = normalize(&record());
        case.clinical.labs.inr = None;
        let summary = concise_patient_summary(&case);
        assert!(summary.contains("LIVER STATUS: COMPENSATED cirrhosis"));
        assert!(summary.contains("INR n/a"));
        assert!(summary.contains("TUMOR: 1 lesion(s), max 3.0cm, unilobar"));
    }
}
