//! Query-time layer over [`GuidelineIndex`].
//!
//! A query is augmented with stage and liver-function context, the nearest
//! `top_k` chunks are filtered by a content-type dependent similarity
//! threshold, structured chunks (tables, diagrams) absorb their neighbours
//! as context, and the resulting groups are reranked by domain keywords
//! before the best `max_groups` are kept.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::corpus::take_chars;
use super::index::GuidelineIndex;
use super::store::ScoredChunk;
use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::models::ChildPughClass;
use crate::staging::StageCode;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalGroup {
    pub primary: ScoredChunk,
    pub context: Vec<ScoredChunk>,
    /// Primary similarity plus weighted context similarity.
    pub combined_score: f32,
    /// Score after keyword reranking; what ranking and confidence use.
    pub final_score: f32,
}

/// Literal terms that let sparse structured chunks bypass the threshold and
/// earn a rerank boost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchTerms {
    pub stage: Option<String>,
    pub child_pugh: Option<String>,
}

impl MatchTerms {
    pub fn new(stage: Option<StageCode>, child_pugh: Option<ChildPughClass>) -> Self {
        Self {
            stage: stage.map(|s| format!("bclc {}", s.as_str().to_lowercase())),
            child_pugh: child_pugh.map(|c| format!("child-pugh {}", c.to_string().to_lowercase())),
        }
    }

    fn stage_in(&self, lower: &str) -> bool {
        self.stage.as_deref().is_some_and(|t| lower.contains(t))
    }

    fn child_pugh_in(&self, lower: &str) -> bool {
        self.child_pugh.as_deref().is_some_and(|t| lower.contains(t))
    }
}

#[derive(Clone)]
pub struct EvidenceRetriever {
    index: GuidelineIndex,
    config: RetrievalConfig,
}

impl EvidenceRetriever {
    pub fn new(index: GuidelineIndex, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn augment_query(
        &self,
        query: &str,
        stage: Option<StageCode>,
        child_pugh: Option<ChildPughClass>,
    ) -> String {
        let mut augmented = format!("{query} {} guidelines", self.config.guideline_name);
        if let Some(stage) = stage {
            augmented.push_str(&format!(" BCLC {stage} treatment"));
        }
        if let Some(cp) = child_pugh {
            augmented.push_str(&format!(" Child-Pugh {cp}"));
        }
        augmented
    }

    pub async fn retrieve(
        &self,
        query: &str,
        stage: Option<StageCode>,
        child_pugh: Option<ChildPughClass>,
    ) -> Result<Vec<RetrievalGroup>, RetrievalError> {
        let augmented = self.augment_query(query, stage, child_pugh);
        let candidates = self.index.query_top_k(&augmented, self.config.top_k).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let terms = MatchTerms::new(stage, child_pugh);
        let filtered = filter_by_relevance(candidates, &terms, &self.config);
        let groups = group_related(filtered, &self.config);
        let ranked = rerank(groups, &terms, &self.config);
        debug!(
            top = ?ranked.iter().take(3).map(|g| g.final_score).collect::<Vec<_>>(),
            "reranked guideline groups"
        );
        Ok(ranked)
    }

    /// Like [`retrieve`](Self::retrieve), but an unavailable index degrades
    /// to an empty evidence set.
    pub async fn retrieve_or_empty(
        &self,
        query: &str,
        stage: Option<StageCode>,
        child_pugh: Option<ChildPughClass>,
    ) -> Vec<RetrievalGroup> {
        match self.retrieve(query, stage, child_pugh).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without evidence");
                Vec::new()
            }
        }
    }

    /// Source-attributed evidence block for prompts, bounded per source.
    pub fn render_context(&self, groups: &[RetrievalGroup]) -> String {
        render_context(groups, &self.config)
    }
}

pub fn filter_by_relevance(
    candidates: Vec<ScoredChunk>,
    terms: &MatchTerms,
    config: &RetrievalConfig,
) -> Vec<ScoredChunk> {
    let before = candidates.len();
    let kept: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter(|c| {
            let threshold = if c.chunk.content_type.is_structured() {
                config.structured_threshold
            } else {
                config.text_threshold
            };
            if c.score >= threshold {
                return true;
            }
            let lower = c.chunk.text.to_lowercase();
            terms.stage_in(&lower) || terms.child_pugh_in(&lower)
        })
        .collect();
    info!(before, after = kept.len(), "filtered retrieval candidates");
    kept
}

/// Structured chunks absorb later, still-unclaimed chunks within one page or
/// from the same section.
pub fn group_related(chunks: Vec<ScoredChunk>, config: &RetrievalConfig) -> Vec<RetrievalGroup> {
    let mut used = vec![false; chunks.len()];
    let mut groups = Vec::new();

    for i in 0..chunks.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let primary = chunks[i].clone();
        let mut context = Vec::new();
        let mut combined = primary.score;

        if primary.chunk.content_type.is_structured() {
            for j in 0..chunks.len() {
                if used[j] {
                    continue;
                }
                let other = &chunks[j];
                if other.chunk.page.abs_diff(primary.chunk.page) <= 1
                    || other.chunk.section == primary.chunk.section
                {
                    combined += other.score * config.context_weight;
                    context.push(other.clone());
                    used[j] = true;
                }
            }
        }

        groups.push(RetrievalGroup {
            primary,
            context,
            combined_score: combined,
            final_score: combined,
        });
    }
    groups
}

pub fn rerank(
    mut groups: Vec<RetrievalGroup>,
    terms: &MatchTerms,
    config: &RetrievalConfig,
) -> Vec<RetrievalGroup> {
    for group in &mut groups {
        let mut score = group.combined_score;
        let lower = group.primary.chunk.text.to_lowercase();

        for boost in &config.keyword_boosts {
            if lower.contains(boost.keyword.as_str()) {
                score *= boost.factor;
            }
        }
        if terms.stage_in(&lower) {
            score *= config.stage_match_boost;
        }
        if terms.child_pugh_in(&lower) {
            score *= config.class_match_boost;
        }
        if group.primary.chunk.content_type.is_structured() {
            score *= config.structured_boost;
        }
        if group.primary.chunk.section.contains("treatment") {
            score *= config.treatment_section_boost;
        }
        if !group.context.is_empty() {
            score *= config.context_boost;
        }
        group.final_score = score;
    }

    groups.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    groups.truncate(config.max_groups);
    groups
}

pub fn render_context(groups: &[RetrievalGroup], config: &RetrievalConfig) -> String {
    if groups.is_empty() {
        return format!(
            "No relevant {} guideline sections found in retrieved sources.",
            config.guideline_name
        );
    }

    let rule = "-".repeat(80);
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let chunk = &group.primary.chunk;
            let mut text = chunk.text.clone();
            for related in group.context.iter().take(config.related_excerpts) {
                text.push_str(&format!(
                    "\n   [RELATED CONTEXT] {}...",
                    take_chars(&related.chunk.text, config.related_excerpt_chars)
                ));
            }
            if text.chars().count() > config.max_chars_per_source {
                text = format!(
                    "{}\n...[TRUNCATED]",
                    take_chars(&text, config.max_chars_per_source)
                );
            }

            let header = if chunk.is_split_table {
                format!(
                    "[SOURCE {}] {} Page {} | PARTIAL TABLE (Part {}/{}) | Section: {}",
                    i + 1,
                    config.guideline_name,
                    chunk.page,
                    chunk.part_index + 1,
                    chunk.total_parts,
                    chunk.section
                )
            } else {
                format!(
                    "[SOURCE {}] {} Page {} | Type: {} | Section: {}",
                    i + 1,
                    config.guideline_name,
                    chunk.page,
                    chunk.content_type.as_str().to_uppercase(),
                    chunk.section
                )
            };
            format!("{header}\n{text}")
        })
        .collect::<Vec<_>>()
        .join(&format!("\n\n{rule}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::chunking::GuidelineChunk;
    use crate::retrieval::corpus::ContentType;

    fn scored(id: &str, page: usize, section: &str, kind: ContentType, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: GuidelineChunk {
                id: id.into(),
                page,
                section: section.into(),
                content_type: kind,
                token_count: text.len() / 4,
                text: text.into(),
                is_split_table: false,
                part_index: 0,
                total_parts: 1,
                has_context: false,
                is_summary: false,
                raw_content: None,
            },
            score,
        }
    }

    fn cfg() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn thresholds_depend_on_content_type_and_terms_bypass() {
        let terms = MatchTerms::new(Some(StageCode::B2), Some(ChildPughClass::A));
        let kept = filter_by_relevance(
            vec![
                scored("t", 1, "s", ContentType::Table, "rows", 0.45),
                scored("x", 2, "s", ContentType::Text, "prose", 0.45),
                scored("y", 3, "s", ContentType::Text, "prose", 0.5),
                scored("z", 4, "s", ContentType::Text, "For BCLC B2 patients", 0.1),
            ],
            &terms,
            &cfg(),
        );
        let ids: Vec<_> = kept.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, ["t", "y", "z"]);
    }

    #[test]
    fn bare_stage_letter_does_not_bypass() {
        let terms = MatchTerms::new(Some(StageCode::A), None);
        let kept = filter_by_relevance(
            vec![scored("a", 1, "s", ContentType::Text, "a patient with a lesion", 0.1)],
            &terms,
            &cfg(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn structured_chunks_absorb_neighbours() {
        let groups = group_related(
            vec![
                scored("table", 10, "staging", ContentType::Table, "t", 0.8),
                scored("next", 11, "other", ContentType::Text, "n", 0.6),
                scored("same", 30, "staging", ContentType::Text, "s", 0.5),
                scored("far", 40, "misc", ContentType::Text, "f", 0.7),
            ],
            &cfg(),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].context.len(), 2);
        assert!((groups[0].combined_score - (0.8 + 0.3 * 0.6 + 0.3 * 0.5)).abs() < 1e-5);
        assert!(groups[1].context.is_empty());
    }

    #[test]
    fn rerank_applies_boosts_and_caps_groups() {
        let chunks = (0..12)
            .map(|i| scored(&format!("c{i}"), i * 5, &format!("s{i}"), ContentType::Text, "plain", 0.6))
            .chain(std::iter::once(scored(
                "boosted",
                100,
                "treatment options",
                ContentType::Text,
                "TACE treatment for BCLC B2",
                0.6,
            )))
            .collect();
        let terms = MatchTerms::new(Some(StageCode::B2), None);
        let ranked = rerank(group_related(chunks, &cfg()), &terms, &cfg());

        assert_eq!(ranked.len(), 7);
        assert_eq!(ranked[0].primary.chunk.id, "boosted");
        // treatment 1.3, bclc 1.5, tace 1.4, stage term 1.4, section 1.2
        let expected = 0.6 * 1.3 * 1.5 * 1.4 * 1.4 * 1.2;
        assert!((ranked[0].final_score - expected).abs() < 1e-4);
    }

    #[test]
    fn rendering_attributes_and_truncates() {
        let mut config = cfg();
        config.max_chars_per_source = 20;
        let group = RetrievalGroup {
            primary: scored("t", 4, "staging", ContentType::Table, &"x".repeat(50), 0.9),
            context: vec![],
            combined_score: 0.9,
            final_score: 1.2,
        };
        let rendered = render_context(&[group], &config);
        assert!(rendered.starts_with("[SOURCE 1] INASL Puri 3 Page 4 | Type: TABLE | Section: staging"));
        assert!(rendered.ends_with("\n...[TRUNCATED]"));
    }

    #[test]
    fn split_tables_get_partial_header_and_related_excerpts() {
        let mut primary = scored("t", 4, "staging", ContentType::Table, "rows", 0.9);
        primary.chunk.is_split_table = true;
        primary.chunk.part_index = 1;
        primary.chunk.total_parts = 3;
        let group = RetrievalGroup {
            primary,
            context: vec![
                scored("a", 5, "s", ContentType::Text, "first", 0.5),
                scored("b", 5, "s", ContentType::Text, "second", 0.5),
                scored("c", 5, "s", ContentType::Text, "third", 0.5),
            ],
            combined_score: 1.35,
            final_score: 2.0,
        };
        let rendered = render_context(&[group], &cfg());
        assert!(rendered.contains("PARTIAL TABLE (Part 2/3)"));
        assert_eq!(rendered.matches("[RELATED CONTEXT]").count(), 2);
    }

    #[test]
    fn empty_evidence_has_placeholder() {
        assert_eq!(
            render_context(&[], &cfg()),
            "No relevant INASL Puri 3 guideline sections found in retrieved sources."
        );
    }
}
