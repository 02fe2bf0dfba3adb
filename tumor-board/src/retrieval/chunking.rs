//! Turns corpus pages into embeddable chunks without breaking tables or
//! diagrams apart from the text that explains them.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::corpus::{
    ContentType, Corpus, GuidelinePage, estimate_tokens, last_chars, take_chars,
    truncate_to_tokens,
};
use crate::config::ChunkingConfig;
use crate::error::RetrievalError;
use crate::generation::TextGenerator;

const SUMMARY_SYSTEM: &str =
    "You summarize clinical guideline figures for retrieval. Output plain prose only.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineChunk {
    pub id: String,
    pub page: usize,
    pub section: String,
    pub content_type: ContentType,
    pub token_count: usize,
    pub text: String,
    #[serde(default)]
    pub is_split_table: bool,
    /// 0-based part index for split tables or split text pages.
    #[serde(default)]
    pub part_index: usize,
    #[serde(default = "one")]
    pub total_parts: usize,
    /// Text was enriched with neighbouring page context.
    #[serde(default)]
    pub has_context: bool,
    #[serde(default)]
    pub is_summary: bool,
    /// Original text of a summarized diagram, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

fn one() -> usize {
    1
}

impl GuidelineChunk {
    fn from_page(page: &GuidelinePage, text: String) -> Self {
        Self {
            id: page.doc_id.clone(),
            page: page.page,
            section: page.section.clone(),
            content_type: page.content_type,
            token_count: estimate_tokens(&text),
            text,
            is_split_table: false,
            part_index: 0,
            total_parts: 1,
            has_context: false,
            is_summary: false,
            raw_content: None,
        }
    }

    fn part(mut self, index: usize, total: usize) -> Self {
        self.id = format!("{}_{index}", self.id);
        self.part_index = index;
        self.total_parts = total;
        self
    }
}

pub struct Chunker<'a> {
    config: &'a ChunkingConfig,
    summarizer: Option<&'a dyn TextGenerator>,
}

impl<'a> Chunker<'a> {
    pub fn new(config: &'a ChunkingConfig, summarizer: Option<&'a dyn TextGenerator>) -> Self {
        Self { config, summarizer }
    }

    pub async fn chunk(&self, corpus: &Corpus) -> Result<Vec<GuidelineChunk>, RetrievalError> {
        let pages = &corpus.pages;
        let mut chunks = Vec::new();

        for (idx, page) in pages.iter().enumerate() {
            let before = self.context_before(pages, idx);
            let after = self.context_after(pages, idx);

            match page.content_type {
                ContentType::Table if page.token_count > self.config.max_embedding_tokens => {
                    chunks.extend(self.split_table(page, &before));
                }
                ContentType::Table => chunks.push(self.enriched_table(page, &before, &after)),
                ContentType::Diagram | ContentType::DiagramWithTable => {
                    chunks.push(self.diagram(page, &before, &after).await);
                }
                ContentType::Text | ContentType::List => {
                    let parts = split_paragraphs(
                        &page.text,
                        self.config.text_chunk_tokens,
                        self.config.text_overlap_tokens,
                    );
                    let total = parts.len();
                    chunks.extend(
                        parts
                            .into_iter()
                            .enumerate()
                            .map(|(i, text)| GuidelineChunk::from_page(page, text).part(i, total)),
                    );
                }
            }
        }

        let limit = self.config.max_embedding_tokens;
        if let Some(over) = chunks.iter().find(|c| c.token_count > limit) {
            return Err(RetrievalError::OversizedChunk {
                chunk_id: over.id.clone(),
                tokens: over.token_count,
                limit,
            });
        }

        if let (Some(min), Some(max)) = (
            chunks.iter().map(|c| c.token_count).min(),
            chunks.iter().map(|c| c.token_count).max(),
        ) {
            info!(chunks = chunks.len(), min, max, "chunking complete");
        }
        Ok(chunks)
    }

    fn context_before(&self, pages: &[GuidelinePage], idx: usize) -> String {
        let n = self.config.surrounding_context_chars;
        match idx.checked_sub(1).and_then(|i| pages.get(i)) {
            Some(prev) if prev.text.chars().count() > n => {
                format!("...{}", last_chars(&prev.text, n))
            }
            Some(prev) => prev.text.clone(),
            None => String::new(),
        }
    }

    fn context_after(&self, pages: &[GuidelinePage], idx: usize) -> String {
        let n = self.config.surrounding_context_chars;
        match pages.get(idx + 1) {
            Some(next) if next.text.chars().count() > n => {
                format!("{}...", take_chars(&next.text, n))
            }
            Some(next) => next.text.clone(),
            None => String::new(),
        }
    }

    /// Safety margin below the hard embedding limit.
    fn ceiling(&self) -> usize {
        self.config.max_embedding_tokens.saturating_sub(100)
    }

    fn clamp(&self, text: String) -> String {
        if estimate_tokens(&text) > self.config.max_embedding_tokens {
            truncate_to_tokens(&text, self.ceiling())
        } else {
            text
        }
    }

    fn enriched_table(&self, page: &GuidelinePage, before: &str, after: &str) -> GuidelineChunk {
        let mut text = format!(
            "PRECEDING CONTEXT:\n{before}\n\n{}\n\nFOLLOWING CONTEXT:\n{after}",
            page.text
        );
        if estimate_tokens(&text) > self.config.max_embedding_tokens {
            text = format!("{}\n\nCONTEXT: {}", page.text, take_chars(before, 200));
        }
        let mut chunk = GuidelineChunk::from_page(page, self.clamp(text));
        chunk.has_context = true;
        chunk
    }

    /// Row-wise split with the header repeated in every part.
    fn split_table(&self, page: &GuidelinePage, before: &str) -> Vec<GuidelineChunk> {
        let rows: Vec<&str> = page.text.lines().filter(|r| r.contains('|')).collect();
        let header_end = rows
            .iter()
            .position(|r| r.contains("|---") || r.contains("| ---"))
            .map(|i| i + 1)
            .unwrap_or(1)
            .min(rows.len());
        let (header, data) = rows.split_at(header_end);
        let header = header.join("\n");

        let target = self
            .config
            .table_part_tokens
            .saturating_sub(estimate_tokens(&header))
            .saturating_sub(self.config.table_part_margin_tokens)
            .max(1);

        let mut parts: Vec<Vec<&str>> = Vec::new();
        let mut current = Vec::new();
        let mut current_tokens = 0;
        for row in data {
            let row_tokens = estimate_tokens(row);
            if current_tokens + row_tokens > target && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current.push(*row);
            current_tokens += row_tokens;
        }
        if !current.is_empty() {
            parts.push(current);
        }
        if parts.is_empty() {
            parts.push(Vec::new());
        }

        let total = parts.len();
        info!(page = page.page, parts = total, "splitting oversized table");
        parts
            .into_iter()
            .enumerate()
            .map(|(i, rows)| {
                let body = format!("{header}\n{}", rows.join("\n"));
                let text = if i == 0 {
                    format!("[TABLE PART 1/{total}]\n{before}\n\n{body}")
                } else {
                    format!("[TABLE PART {}/{total} - CONTINUED]\n{body}", i + 1)
                };
                let mut chunk = GuidelineChunk::from_page(page, self.clamp(text)).part(i, total);
                chunk.is_split_table = true;
                chunk
            })
            .collect()
    }

    async fn diagram(&self, page: &GuidelinePage, before: &str, after: &str) -> GuidelineChunk {
        if page.token_count <= self.config.max_embedding_tokens {
            let text = format!("{before}\n\n{}\n\n{after}", page.text);
            let text = if estimate_tokens(&text) > self.config.max_embedding_tokens {
                truncate_to_tokens(&page.text, self.ceiling())
            } else {
                text
            };
            let mut chunk = GuidelineChunk::from_page(page, text);
            chunk.has_context = true;
            return chunk;
        }

        let summary = self.summarize(page).await;
        let text = self.clamp(format!(
            "CONTEXT:\n{before}\n\n{summary}\n\nCONTEXT:\n{after}"
        ));
        let mut chunk = GuidelineChunk::from_page(page, text);
        chunk.is_summary = true;
        chunk.raw_content = Some(take_chars(&page.text, self.config.raw_content_chars).to_string());
        chunk
    }

    /// Falls back to plain truncation when no summarizer is configured or the
    /// call fails.
    async fn summarize(&self, page: &GuidelinePage) -> String {
        let budget = self.config.diagram_summary_tokens;
        let Some(generator) = self.summarizer else {
            return truncate_to_tokens(&page.text, budget);
        };

        let prompt = format!(
            "Summarize this HCC guideline diagram/flowchart for medical retrieval.\n\
             Focus on: treatment decision points, BCLC staging, clinical pathways, \
             contraindications.\nMaximum {} words.\n\nCONTENT:\n{}\n\nSUMMARY:\n",
            budget / 4,
            take_chars(&page.text, 8_000)
        );
        match generator.complete(&prompt, SUMMARY_SYSTEM).await {
            Ok(summary) => format!(
                "[DIAGRAM SUMMARY - {} tokens]\n{summary}",
                page.token_count
            ),
            Err(e) => {
                warn!(page = page.page, error = %e, "diagram summarization failed, truncating");
                truncate_to_tokens(&page.text, budget)
            }
        }
    }
}

/// Paragraph-aware split with token overlap between consecutive chunks.
pub fn split_paragraphs(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if estimate_tokens(para) > chunk_tokens {
            paragraphs.extend(split_window(para, chunk_tokens * 4, overlap_tokens * 4));
        } else {
            paragraphs.push(para.to_string());
        }
    }

    let mut chunks = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut window_tokens = 0;
    for para in paragraphs {
        let tokens = estimate_tokens(&para);
        if window_tokens + tokens > chunk_tokens && !window.is_empty() {
            chunks.push(window.join("\n\n"));
            // Carry trailing paragraphs into the next chunk as overlap.
            let mut carried = Vec::new();
            let mut carried_tokens = 0;
            for prev in window.iter().rev() {
                let t = estimate_tokens(prev);
                if carried_tokens + t > overlap_tokens || carried_tokens + t + tokens > chunk_tokens
                {
                    break;
                }
                carried.push(prev.clone());
                carried_tokens += t;
            }
            carried.reverse();
            window = carried;
            window_tokens = carried_tokens;
        }
        window_tokens += tokens;
        window.push(para);
    }
    if !window.is_empty() {
        chunks.push(window.join("\n\n"));
    }
    chunks
}

fn split_window(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}
