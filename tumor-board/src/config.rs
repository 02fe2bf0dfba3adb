//! Run configuration. Built once at startup and handed to constructors by
//! reference; nothing below reads the environment after `load` returns.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, BoardResult};
use crate::specialists::SpecialistRole;

pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_MODEL: &str = "TUMOR_BOARD_MODEL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_CACHE_DIR: &str = "TUMOR_BOARD_CACHE_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub pipeline: PipelineConfig,
}

impl BoardConfig {
    /// Defaults, then the YAML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> BoardResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> BoardResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> BoardResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| BoardError::Config(format!("invalid YAML: {e}")))
    }

    /// Apply overrides from `lookup`, normally `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.generation.api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|m| !m.trim().is_empty()) {
            self.generation.model = model;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()) {
            self.index.database_url = Some(url);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.trim().is_empty()) {
            self.index.cache_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> BoardResult<()> {
        let r = &self.retrieval;
        if r.top_k == 0 || r.max_groups == 0 {
            return Err(BoardError::Config(
                "retrieval.top_k and retrieval.max_groups must be positive".into(),
            ));
        }
        if r.max_chars_per_source == 0 {
            return Err(BoardError::Config(
                "retrieval.max_chars_per_source must be positive".into(),
            ));
        }
        let c = &self.chunking;
        if c.text_overlap_tokens >= c.text_chunk_tokens {
            return Err(BoardError::Config(
                "chunking.text_overlap_tokens must be smaller than chunking.text_chunk_tokens"
                    .into(),
            ));
        }
        if c.table_part_tokens >= c.max_embedding_tokens {
            return Err(BoardError::Config(
                "chunking.table_part_tokens must be below chunking.max_embedding_tokens".into(),
            ));
        }
        if self.generation.retry.max_attempts == 0 {
            return Err(BoardError::Config(
                "generation.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.pipeline.max_concurrent_specialists == 0 {
            return Err(BoardError::Config(
                "pipeline.max_concurrent_specialists must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "openai/gpt-4o".to_string(),
            temperature: 0.0,
            request_timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff, applied to transient failures only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModelChoice {
    AllMiniLmL6V2,
    BgeSmallEnV15,
    BgeBaseEnV15,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: EmbeddingModelChoice,
    pub batch_size: usize,
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModelChoice::AllMiniLmL6V2,
            batch_size: 32,
            show_download_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBoost {
    pub keyword: String,
    pub factor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub guideline_name: String,
    pub top_k: usize,
    pub max_groups: usize,
    pub structured_threshold: f32,
    pub text_threshold: f32,
    pub context_weight: f32,
    pub stage_match_boost: f32,
    pub class_match_boost: f32,
    pub structured_boost: f32,
    pub treatment_section_boost: f32,
    pub context_boost: f32,
    pub keyword_boosts: Vec<KeywordBoost>,
    pub max_chars_per_source: usize,
    pub related_excerpt_chars: usize,
    pub related_excerpts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let keyword_boosts = [
            ("treatment", 1.3),
            ("therapy", 1.3),
            ("bclc", 1.5),
            ("stage", 1.4),
            ("resection", 1.3),
            ("ablation", 1.3),
            ("tace", 1.4),
            ("tare", 1.4),
            ("transplant", 1.4),
            ("systemic", 1.3),
            ("sorafenib", 1.3),
            ("atezolizumab", 1.3),
            ("child-pugh", 1.4),
            ("meld", 1.3),
            ("portal", 1.3),
            ("pvtt", 1.4),
            ("contraindication", 1.4),
            ("eligibility", 1.3),
            ("criteria", 1.3),
            ("inasl", 1.5),
            ("puri", 1.4),
        ]
        .into_iter()
        .map(|(keyword, factor)| KeywordBoost {
            keyword: keyword.to_string(),
            factor,
        })
        .collect();

        Self {
            guideline_name: "INASL Puri 3".to_string(),
            top_k: 15,
            max_groups: 7,
            structured_threshold: 0.4,
            text_threshold: 0.5,
            context_weight: 0.3,
            stage_match_boost: 1.4,
            class_match_boost: 1.3,
            structured_boost: 1.35,
            treatment_section_boost: 1.2,
            context_boost: 1.15,
            keyword_boosts,
            max_chars_per_source: 5_000,
            related_excerpt_chars: 400,
            related_excerpts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub page_separator: String,
    pub max_embedding_tokens: usize,
    pub table_part_tokens: usize,
    pub table_part_margin_tokens: usize,
    pub text_chunk_tokens: usize,
    pub text_overlap_tokens: usize,
    pub surrounding_context_chars: usize,
    pub diagram_summary_tokens: usize,
    pub raw_content_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            page_separator: "---PAGE_BREAK---".to_string(),
            max_embedding_tokens: 8_000,
            table_part_tokens: 6_000,
            table_part_margin_tokens: 500,
            text_chunk_tokens: 1_200,
            text_overlap_tokens: 300,
            surrounding_context_chars: 300,
            diagram_summary_tokens: 5_000,
            raw_content_chars: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub cache_dir: PathBuf,
    /// When set, chunks live in PostgreSQL (pgvector) instead of the local cache.
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub table: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            database_url: None,
            table: "guideline_chunks".to_string(),
        }
    }
}

/// What the staging classifier does when ECOG or Child-Pugh is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Assume ECOG 0 / Child-Pugh A5 and record a data-quality warning.
    SubstituteDefaults,
    /// Refuse the record before the pipeline starts.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub missing_data_policy: MissingDataPolicy,
    /// Role whose assessment decides the consensus when it succeeded.
    pub lead_role: SpecialistRole,
    pub max_concurrent_specialists: usize,
    pub inter_call_delay_ms: u64,
    pub consensus_excerpt_chars: usize,
    pub consensus_flag_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            missing_data_policy: MissingDataPolicy::SubstituteDefaults,
            lead_role: SpecialistRole::Hepatologist,
            max_concurrent_specialists: 2,
            inter_call_delay_ms: 0,
            consensus_excerpt_chars: 400,
            consensus_flag_limit: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BoardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 15);
        assert_eq!(config.retrieval.max_groups, 7);
        assert_eq!(config.generation.retry.max_attempts, 3);
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = BoardConfig::from_yaml_str(
            r#"
retrieval:
  top_k: 10
  guideline_name: "EASL 2025"
pipeline:
  missing_data_policy: reject
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.guideline_name, "EASL 2025");
        assert_eq!(config.retrieval.max_groups, 7);
        assert_eq!(config.pipeline.missing_data_policy, MissingDataPolicy::Reject);
        assert_eq!(config.pipeline.lead_role, SpecialistRole::Hepatologist);
        assert_eq!(config.chunking.max_embedding_tokens, 8_000);
    }

    #[test]
    fn env_overrides_apply_and_blank_values_are_ignored() {
        let mut config = BoardConfig::default();
        config.apply_env(|key| match key {
            ENV_API_KEY => Some("sk-test".to_string()),
            ENV_MODEL => Some("  ".to_string()),
            ENV_CACHE_DIR => Some("/tmp/tb".to_string()),
            _ => None,
        });
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.generation.model, "openai/gpt-4o");
        assert_eq!(config.index.cache_dir, PathBuf::from("/tmp/tb"));
        assert!(config.index.database_url.is_none());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut config = BoardConfig::default();
        config.chunking.text_overlap_tokens = config.chunking.text_chunk_tokens;
        assert!(matches!(config.validate(), Err(BoardError::Config(_))));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1).as_millis(), 500);
        assert_eq!(policy.delay_for(2).as_millis(), 1_000);
        assert_eq!(policy.delay_for(10).as_millis(), 8_000);
    }
}
