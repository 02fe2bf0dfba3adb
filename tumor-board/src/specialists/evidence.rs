//! Confidence and evidence-quality scoring from retrieval groups.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::retrieval::corpus::ContentType;
use crate::retrieval::retriever::RetrievalGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceQuality {
    None,
    Moderate,
    Medium,
    High,
    Error,
    /// The role had nothing to assess (e.g. pathology with LR-5 imaging).
    #[serde(rename = "Not Applicable")]
    NotApplicable,
}

impl fmt::Display for EvidenceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EvidenceQuality::None => "None",
            EvidenceQuality::Moderate => "Moderate",
            EvidenceQuality::Medium => "Medium",
            EvidenceQuality::High => "High",
            EvidenceQuality::Error => "Error",
            EvidenceQuality::NotApplicable => "Not Applicable",
        };
        f.write_str(label)
    }
}

fn average_score(groups: &[RetrievalGroup]) -> Option<f32> {
    if groups.is_empty() {
        None
    } else {
        Some(groups.iter().map(|g| g.final_score).sum::<f32>() / groups.len() as f32)
    }
}

/// `min(1, avg(final_score) / 2)`, rounded to two decimals.
pub fn confidence(groups: &[RetrievalGroup]) -> f32 {
    average_score(groups)
        .map(|avg| ((avg / 2.0).min(1.0) * 100.0).round() / 100.0)
        .unwrap_or(0.0)
}

pub fn quality(groups: &[RetrievalGroup]) -> EvidenceQuality {
    let Some(avg) = average_score(groups) else {
        return EvidenceQuality::None;
    };
    let kinds = groups.iter().map(|g| g.primary.chunk.content_type);
    let has_table = kinds
        .clone()
        .any(|k| matches!(k, ContentType::Table | ContentType::DiagramWithTable));
    let has_diagram = kinds.clone().any(|k| k.is_diagram());
    let has_context = groups.iter().any(|g| !g.context.is_empty());

    if has_table && has_diagram && has_context && avg > 1.5 {
        EvidenceQuality::High
    } else if (has_table || has_diagram) && avg > 1.0 {
        EvidenceQuality::Medium
    } else {
        EvidenceQuality::Moderate
    }
}
