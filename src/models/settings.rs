//! Settings Models
//!
//! Reader configuration as stored in `config.toml`. Every field has a
//! default, so a partial (or missing) file is valid.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use deep_reader_core::proxy::ProxyConfig;
use deep_reader_llm::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

use crate::services::knowledge::chunker::FixedSizeChunker;
use crate::services::knowledge::embedding_provider::{EmbeddingProviderConfig, EmbeddingProviderType};
use crate::utils::error::AppError;

// ---------------------------------------------------------------------------
// Modes and strategies
// ---------------------------------------------------------------------------

/// Report depth preset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    /// Smallest report, for quick debugging.
    Test,
    #[default]
    Concise,
    /// Most thorough report, slowest.
    Deep,
}

impl fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingMode::Test => write!(f, "test"),
            ReadingMode::Concise => write!(f, "concise"),
            ReadingMode::Deep => write!(f, "deep"),
        }
    }
}

/// How the document is cut into reading segments.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ParsingStrategy {
    /// Fixed-size overlapping windows.
    #[default]
    Snippet,
    /// Top-level markdown sections, falling back to snippets without headings.
    Chapter,
}

impl fmt::Display for ParsingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingStrategy::Snippet => write!(f, "snippet"),
            ParsingStrategy::Chapter => write!(f, "chapter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outline caps
// ---------------------------------------------------------------------------

/// Upper bound on the number of outline nodes at one level.
///
/// Written in TOML either as an integer or as the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CapRepr", into = "CapRepr")]
pub enum OutlineCap {
    Limit(usize),
    Unlimited,
}

impl OutlineCap {
    pub fn limit(&self) -> Option<usize> {
        match self {
            OutlineCap::Limit(n) => Some(*n),
            OutlineCap::Unlimited => None,
        }
    }

    pub fn allows(&self, count: usize) -> bool {
        self.limit().map_or(true, |max| count <= max)
    }
}

impl fmt::Display for OutlineCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlineCap::Limit(n) => write!(f, "{}", n),
            OutlineCap::Unlimited => write!(f, "unlimited"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapRepr {
    Count(usize),
    Word(String),
}

impl TryFrom<CapRepr> for OutlineCap {
    type Error = String;

    fn try_from(repr: CapRepr) -> Result<Self, Self::Error> {
        match repr {
            CapRepr::Count(n) => Ok(OutlineCap::Limit(n)),
            CapRepr::Word(word) if word.eq_ignore_ascii_case("unlimited") => Ok(OutlineCap::Unlimited),
            CapRepr::Word(word) => Err(format!(
                "invalid outline cap '{}': expected a number or \"unlimited\"",
                word
            )),
        }
    }
}

impl From<OutlineCap> for CapRepr {
    fn from(cap: OutlineCap) -> Self {
        match cap {
            OutlineCap::Limit(n) => CapRepr::Count(n),
            OutlineCap::Unlimited => CapRepr::Word("unlimited".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-mode settings
// ---------------------------------------------------------------------------

/// Effective knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Questions the reading agent may pose per chapter.
    pub reading_agent_questions: usize,
    /// Critique/refine rounds in the report stage.
    pub debate_rounds: usize,
    pub outline_max_top_level: OutlineCap,
    pub outline_max_second_level: OutlineCap,
}

impl ModeSettings {
    /// Built-in table.
    pub fn preset(mode: ReadingMode) -> Self {
        match mode {
            ReadingMode::Test => Self {
                reading_agent_questions: 1,
                debate_rounds: 1,
                outline_max_top_level: OutlineCap::Limit(2),
                outline_max_second_level: OutlineCap::Limit(2),
            },
            ReadingMode::Concise => Self {
                reading_agent_questions: 3,
                debate_rounds: 2,
                outline_max_top_level: OutlineCap::Limit(4),
                outline_max_second_level: OutlineCap::Limit(5),
            },
            ReadingMode::Deep => Self {
                reading_agent_questions: 5,
                debate_rounds: 5,
                outline_max_top_level: OutlineCap::Unlimited,
                outline_max_second_level: OutlineCap::Unlimited,
            },
        }
    }

    fn apply(mut self, overrides: &ModeOverride) -> Self {
        if let Some(n) = overrides.reading_agent_questions {
            self.reading_agent_questions = n;
        }
        if let Some(n) = overrides.debate_rounds {
            self.debate_rounds = n;
        }
        if let Some(cap) = overrides.outline_max_top_level {
            self.outline_max_top_level = cap;
        }
        if let Some(cap) = overrides.outline_max_second_level {
            self.outline_max_second_level = cap;
        }
        self
    }
}

/// Partial override of a preset, from `[modes.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeOverride {
    pub reading_agent_questions: Option<usize>,
    pub debate_rounds: Option<usize>,
    pub outline_max_top_level: Option<OutlineCap>,
    pub outline_max_second_level: Option<OutlineCap>,
}

// ---------------------------------------------------------------------------
// Model roles
// ---------------------------------------------------------------------------

/// One `[llm.<role>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub provider: ProviderType,
    pub model: String,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl RoleConfig {
    fn openai(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::default()
        }
    }

    /// Resolve into a provider config, reading the key from the environment.
    pub fn to_provider_config(&self, proxy: Option<&ProxyConfig>) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            api_key: self
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty()),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            proxy: proxy.cloned(),
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAI,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: 0.5,
            max_tokens: 8192,
        }
    }
}

/// The `[llm]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub fast: RoleConfig,
    pub smart: RoleConfig,
    pub writer: RoleConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<RoleConfig>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            fast: RoleConfig::openai("gpt-4o-mini"),
            smart: RoleConfig::openai("gpt-4o"),
            writer: RoleConfig::openai("gpt-4o"),
            search: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// The `[embedding]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderType,
    /// Defaults to the provider's model.
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::OpenAI,
            model: None,
            dimension: None,
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        }
    }
}

impl EmbeddingSettings {
    pub fn to_provider_config(
        &self,
        batch_size: usize,
        proxy: Option<&ProxyConfig>,
    ) -> EmbeddingProviderConfig {
        let mut config = EmbeddingProviderConfig::new(self.provider);
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        config.dimension = self.dimension;
        config.base_url = self.base_url.clone();
        config.api_key = self
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty());
        config.batch_size = batch_size;
        config.proxy = proxy.cloned();
        config
    }
}

// ---------------------------------------------------------------------------
// DeepReaderConfig
// ---------------------------------------------------------------------------

/// Top-level configuration (`config.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepReaderConfig {
    pub mode: ReadingMode,
    pub parsing_strategy: ParsingStrategy,
    /// Characters per reading segment.
    pub snippet_chunk_size: usize,
    pub snippet_overlap_ratio: f64,
    /// Characters per retrieval chunk.
    pub rag_chunk_size: usize,
    pub rag_chunk_overlap: usize,
    pub retrieval_k: usize,
    pub max_structured_attempts: usize,
    pub embedding_batch_size: usize,
    /// Root for vector stores, checkpoints, and output. Defaults to
    /// `~/.deep-reader`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    /// Applied to every provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    /// Per-mode overrides keyed by mode name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub modes: BTreeMap<String, ModeOverride>,
}

impl Default for DeepReaderConfig {
    fn default() -> Self {
        Self {
            mode: ReadingMode::default(),
            parsing_strategy: ParsingStrategy::default(),
            snippet_chunk_size: 6000,
            snippet_overlap_ratio: 0.15,
            rag_chunk_size: 1000,
            rag_chunk_overlap: 200,
            retrieval_k: 10,
            max_structured_attempts: 3,
            embedding_batch_size: 100,
            data_dir: None,
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            proxy: None,
            modes: BTreeMap::new(),
        }
    }
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<ReadingMode>,
    pub parsing_strategy: Option<ParsingStrategy>,
    pub data_dir: Option<PathBuf>,
}

impl DeepReaderConfig {
    /// Effective settings for the configured mode.
    pub fn mode_settings(&self) -> ModeSettings {
        let preset = ModeSettings::preset(self.mode);
        match self.modes.get(&self.mode.to_string()) {
            Some(overrides) => preset.apply(overrides),
            None => preset,
        }
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(strategy) = overrides.parsing_strategy {
            self.parsing_strategy = strategy;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = Some(dir);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        // Same geometry check the reading stage runs, so a bad window fails
        // here rather than after ingestion.
        FixedSizeChunker::new(self.snippet_chunk_size, self.snippet_overlap_ratio).map_err(
            |e| match e {
                AppError::Config(msg) => format!("snippet chunking: {}", msg),
                other => other.to_string(),
            },
        )?;
        if self.rag_chunk_size == 0 {
            return Err("rag_chunk_size must be greater than zero".to_string());
        }
        if self.rag_chunk_overlap >= self.rag_chunk_size {
            return Err(format!(
                "rag_chunk_overlap ({}) must be smaller than rag_chunk_size ({})",
                self.rag_chunk_overlap, self.rag_chunk_size
            ));
        }
        if self.retrieval_k == 0 {
            return Err("retrieval_k must be at least 1".to_string());
        }
        if self.max_structured_attempts == 0 {
            return Err("max_structured_attempts must be at least 1".to_string());
        }
        if self.embedding_batch_size == 0 {
            return Err("embedding_batch_size must be at least 1".to_string());
        }

        let roles = [
            ("fast", Some(&self.llm.fast)),
            ("smart", Some(&self.llm.smart)),
            ("writer", Some(&self.llm.writer)),
            ("search", self.llm.search.as_ref()),
        ];
        for (name, role) in roles {
            if let Some(role) = role {
                if role.model.trim().is_empty() {
                    return Err(format!("llm.{}.model must not be empty", name));
                }
            }
        }
        if self.embedding.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err("embedding.model must not be empty".to_string());
        }

        for name in self.modes.keys() {
            if !["test", "concise", "deep"].contains(&name.as_str()) {
                return Err(format!("unknown mode in [modes]: {}", name));
            }
        }
        Ok(())
    }
}
