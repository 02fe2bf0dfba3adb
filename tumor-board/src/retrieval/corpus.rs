//! Guideline corpus: page split, content-type detection and corpus identity.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BoardResult;

/// Rough token estimate (4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Cut `text` so that [`estimate_tokens`] stays within `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    take_chars(text, max_tokens * 4).to_string()
}

/// Prefix of at most `n` characters, split on a char boundary.
pub fn take_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Suffix of at most `n` characters.
pub fn last_chars(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    if total <= n {
        return text;
    }
    match text.char_indices().nth(total - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    List,
    Table,
    Diagram,
    DiagramWithTable,
}

impl ContentType {
    /// Tables and diagrams get the lower relevance threshold, absorb
    /// neighbouring chunks as context and are boosted at rerank time.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            ContentType::Table | ContentType::Diagram | ContentType::DiagramWithTable
        )
    }

    pub fn is_diagram(&self) -> bool {
        matches!(self, ContentType::Diagram | ContentType::DiagramWithTable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::List => "list",
            ContentType::Table => "table",
            ContentType::Diagram => "diagram",
            ContentType::DiagramWithTable => "diagram_with_table",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FIGURE_MARKERS: [&str; 4] = ["figure", "flowchart", "diagram", "algorithm"];

pub fn has_markdown_table(content: &str) -> bool {
    content.contains('|') && (content.contains("|---") || content.contains("| ---"))
}

pub fn detect_content_type(content: &str) -> ContentType {
    let lower = content.to_lowercase();
    let has_table = has_markdown_table(content);
    let has_figure = FIGURE_MARKERS.iter().any(|m| lower.contains(m));
    let has_list = content.matches("\n-").count() > 3 || content.matches("\n*").count() > 3;

    match (has_figure, has_table) {
        (true, true) => ContentType::DiagramWithTable,
        (true, false) => ContentType::Diagram,
        (false, true) => ContentType::Table,
        _ if has_list => ContentType::List,
        _ => ContentType::Text,
    }
}

/// First markdown heading within the first 15 lines, lowercased, or
/// "general".
pub fn extract_section(content: &str) -> String {
    content
        .lines()
        .take(15)
        .find(|line| line.starts_with('#'))
        .map(|line| line.replace(['#', ':'], "").trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "general".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelinePage {
    pub doc_id: String,
    /// 1-based.
    pub page: usize,
    pub section: String,
    pub content_type: ContentType,
    pub token_count: usize,
    pub char_count: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Corpus {
    pub pages: Vec<GuidelinePage>,
    /// SHA-256 of the raw corpus text; the index cache key.
    pub fingerprint: String,
}

impl Corpus {
    pub fn from_text(raw: &str, separator: &str) -> Self {
        let pages = raw
            .split(separator)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(i, text)| GuidelinePage {
                doc_id: format!("doc_{i}"),
                page: i + 1,
                section: extract_section(text),
                content_type: detect_content_type(text),
                token_count: estimate_tokens(text),
                char_count: text.chars().count(),
                text: text.to_string(),
            })
            .collect();

        Self {
            pages,
            fingerprint: fingerprint(raw),
        }
    }

    pub fn from_file(path: &Path, separator: &str) -> BoardResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&raw, separator))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub fn fingerprint(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &str = "---PAGE_BREAK---";

    #[test]
    fn content_types_are_detected() {
        assert_eq!(
            detect_content_type("| Stage | Therapy |\n|---|---|\n| A | RFA |"),
            ContentType::Table
        );
        assert_eq!(
            detect_content_type("Figure 2: BCLC treatment algorithm"),
            ContentType::Diagram
        );
        assert_eq!(
            detect_content_type("Flowchart\n| a | b |\n| --- | --- |"),
            ContentType::DiagramWithTable
        );
        assert_eq!(
            detect_content_type("Items\n- one\n- two\n- three\n- four"),
            ContentType::List
        );
        assert_eq!(detect_content_type("Plain prose."), ContentType::Text);
    }

    #[test]
    fn section_comes_from_first_heading() {
        assert_eq!(
            extract_section("intro\n## Treatment: Early HCC\nbody"),
            "treatment early hcc"
        );
        assert_eq!(extract_section("no heading here"), "general");
    }

    #[test]
    fn pages_split_on_separator_and_are_numbered() {
        let corpus = Corpus::from_text(&format!("# One\nfirst{SEP}\n{SEP}# Two\nsecond"), SEP);
        assert_eq!(corpus.pages.len(), 2);
        assert_eq!(corpus.pages[1].page, 2);
        assert_eq!(corpus.pages[1].section, "two");
        assert_eq!(corpus.fingerprint.len(), 64);
    }

    #[test]
    fn fingerprint_tracks_content() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn char_helpers_respect_boundaries() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(last_chars("héllo", 3), "llo");
        assert_eq!(last_chars("hi", 5), "hi");
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
