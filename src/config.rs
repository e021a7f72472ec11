use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Engine configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Chunker settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in bytes (snapped to character boundaries).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How much of the previous chunk's tail each chunk repeats.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

/// Retrieval tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum passages returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity score for a passage to count as relevant.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Cap on passages from any single document in one result.
    #[serde(default = "default_max_passages_per_document")]
    pub max_passages_per_document: usize,
    /// Candidates fetched from the index before per-document deduplication.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            max_passages_per_document: default_max_passages_per_document(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.7
}
fn default_max_passages_per_document() -> usize {
    1
}
fn default_candidate_k() -> usize {
    40
}

/// Context-assembly settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Total prompt budget, in estimated tokens.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// How many of the most recent turns are considered at all before
    /// budgeting.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            memory_window: default_memory_window(),
        }
    }
}

fn default_token_budget() -> usize {
    3000
}
fn default_memory_window() -> usize {
    20
}

/// Embedding client settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector dimensionality the model produces.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Maximum texts per API call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// One generation backend behind the router.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Name used in `provider_order` and in turn outcomes.
    pub name: String,
    /// Base URL of an OpenAI-compatible chat-completions API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

/// Generation and routing settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Fallback order; the first entry is the default provider.
    #[serde(default)]
    pub provider_order: Vec<String>,
    /// Configured backends, referenced by `provider_order`.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Timeout for a single provider attempt.
    #[serde(default = "default_per_attempt_timeout_secs")]
    pub per_attempt_timeout_secs: u64,
    /// End-to-end budget for one turn (retrieval + assembly + generation).
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider_order: Vec::new(),
            providers: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            per_attempt_timeout_secs: default_per_attempt_timeout_secs(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_per_attempt_timeout_secs() -> u64 {
    30
}
fn default_turn_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
    }
    if config.retrieval.max_passages_per_document < 1 {
        anyhow::bail!("retrieval.max_passages_per_document must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }

    if config.context.token_budget == 0 {
        anyhow::bail!("context.token_budget must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.generation.per_attempt_timeout_secs == 0 {
        anyhow::bail!("generation.per_attempt_timeout_secs must be > 0");
    }
    if config.generation.turn_timeout_secs == 0 {
        anyhow::bail!("generation.turn_timeout_secs must be > 0");
    }
    for name in &config.generation.provider_order {
        if !config.generation.providers.iter().any(|p| &p.name == name) {
            anyhow::bail!("generation.provider_order names unknown provider: '{}'", name);
        }
    }

    Ok(())
}
