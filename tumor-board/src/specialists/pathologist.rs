//! Pathology. Only consulted when tissue or indeterminate imaging leaves
//! the diagnosis open; LR-5 imaging without biopsy needs no review.

use super::{
    CaseContext, EvidenceQuality, PromptFrame, Specialist, SpecialistAssessment, SpecialistRole,
};
use crate::models::ChildPughClass;
use crate::staging::StageCode;

pub struct Pathologist;

impl Specialist for Pathologist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Pathologist
    }

    fn system_text(&self) -> &'static str {
        "You are a hepatopathologist on a hepatocellular carcinoma tumor board. \
         Ground every statement in the quoted guideline excerpts."
    }

    fn query(&self, ctx: &CaseContext) -> String {
        format!(
            "HCC biopsy indications, histologic diagnosis, differentiation grading. \
             LI-RADS {}. When is biopsy needed?",
            ctx.li_rads()
        )
    }

    fn retrieval_terms(&self, _ctx: &CaseContext) -> (Option<StageCode>, Option<ChildPughClass>) {
        (None, None)
    }

    fn prompt(&self, ctx: &CaseContext, frame: &PromptFrame<'_>) -> String {
        let pathology = &ctx.case.pathology;
        format!(
            "PATHOLOGIST\n\n\
             IMAGING: LI-RADS {lirads}\n\
             BIOPSY PERFORMED: {biopsy}\n\
             HISTOLOGY: {diagnosis}\n\
             DIFFERENTIATION: {grade}\n\
             VASCULAR INVASION: {invasion}\n\n\
             {evidence}\n\n\
             PROVIDE:\n\
             1. DIAGNOSTIC CERTAINTY (is tissue diagnosis required?)\n\
             2. HISTOLOGIC INTERPRETATION (grade, vascular invasion and their staging impact)\n\
             3. RECOMMENDATION on further biopsy or review with the supporting [SOURCE #]",
            lirads = ctx.li_rads(),
            biopsy = if pathology.biopsy_performed { "yes" } else { "no" },
            diagnosis = pathology.diagnosis.as_deref().unwrap_or("Not available"),
            grade = pathology.differentiation.as_deref().unwrap_or("Not graded"),
            invasion = match pathology.vascular_invasion {
                Some(true) => "present",
                Some(false) => "absent",
                None => "not reported",
            },
            evidence = frame.grounded_evidence(
                "Focus on biopsy indications and histologic findings"
            ),
        )
    }

    fn recommendations(&self, ctx: &CaseContext, _response: &str) -> Vec<String> {
        let pathology = &ctx.case.pathology;
        vec![
            format!(
                "Histology: {}",
                pathology.diagnosis.as_deref().unwrap_or("Not available")
            ),
            format!(
                "Grade: {}",
                pathology.differentiation.as_deref().unwrap_or("Not graded")
            ),
        ]
    }

    fn critical_flags(&self, ctx: &CaseContext) -> Vec<String> {
        let pathology = &ctx.case.pathology;
        let mut flags = Vec::new();
        if pathology.has_vascular_invasion() {
            flags.push("Vascular invasion on histology - upstages to BCLC C".to_string());
        }
        if pathology.is_poorly_differentiated() {
            flags.push("Poorly differentiated HCC - aggressive biology".to_string());
        }
        flags
    }

    fn short_circuit(&self, ctx: &CaseContext) -> Option<SpecialistAssessment> {
        if ctx.case.pathology.biopsy_performed || !ctx.li_rads().is_definitive() {
            return None;
        }
        let role = self.role();
        Some(SpecialistAssessment {
            role,
            department: role.department().to_string(),
            assessment: "Pathologist consultation not indicated. LR-5 imaging provides adequate \
                         diagnostic certainty. Biopsy not performed."
                .to_string(),
            recommendations: vec!["No pathology review needed - LR-5 diagnosis".to_string()],
            confidence: 1.0,
            evidence_quality: EvidenceQuality::NotApplicable,
            critical_flags: Vec::new(),
            role_weight: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LiRads;
    use crate::specialists::test_support::{context, lesion};

    #[test]
    fn lr5_without_biopsy_short_circuits() {
        let ctx = context(200.0, vec![lesion(3.0, "6")]);
        let fixed = Pathologist.short_circuit(&ctx).unwrap();
        assert_eq!(fixed.evidence_quality, EvidenceQuality::NotApplicable);
        assert_eq!(fixed.confidence, 1.0);
        assert!(fixed.critical_flags.is_empty());
        assert!(!fixed.is_error());
    }

    #[test]
    fn biopsy_or_indeterminate_imaging_needs_review() {
        let mut biopsied = context(200.0, vec![lesion(3.0, "6")]);
        biopsied.case.pathology.biopsy_performed = true;
        assert!(Pathologist.short_circuit(&biopsied).is_none());

        let mut indeterminate = context(200.0, vec![lesion(3.0, "6")]);
        indeterminate.case.tumor.overall_certainty = Some(LiRads::Lr3);
        assert!(Pathologist.short_circuit(&indeterminate).is_none());
    }

    #[test]
    fn histology_flags_and_recommendations() {
        let mut ctx = context(200.0, vec![lesion(3.0, "6")]);
        ctx.case.pathology.biopsy_performed = true;
        ctx.case.pathology.diagnosis = Some("Hepatocellular carcinoma".into());
        ctx.case.pathology.differentiation = Some("Poorly differentiated".into());
        ctx.case.pathology.vascular_invasion = Some(true);

        assert_eq!(
            Pathologist.critical_flags(&ctx),
            vec![
                "Vascular invasion on histology - upstages to BCLC C",
                "Poorly differentiated HCC - aggressive biology",
            ]
        );
        assert_eq!(
            Pathologist.recommendations(&ctx, ""),
            vec!["Histology: Hepatocellular carcinoma", "Grade: Poorly differentiated"]
        );
    }
}
