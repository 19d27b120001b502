//! Configuration schema and TOML loading.
//!
//! Every level carries `#[serde(default)]` so a partial or missing config
//! file still produces a fully-populated [`VibescoutConfig`]. Lives at
//! `$HOME/.vibescout/config.toml` (override via `VIBESCOUT_HOME`), or
//! per-project at `<root>/.vibescout/config.toml`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct VibescoutConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub summarizer: SummarizerTomlConfig,
    #[serde(default)]
    pub domains: DomainsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub git_integration: GitIntegrationConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub file_types: HashMap<String, FileTypeConfig>,
    #[serde(default)]
    pub watch_directories: Vec<String>,
    #[serde(default)]
    pub throttling_errors: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    10987
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct IndexerConfig {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub parallel_workers: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding model name (fastembed model enum variant).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Cache directory for model files.
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Number of embedder pool instances (1-8).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Path to custom quantized ONNX model (INT8).
    #[serde(default)]
    pub quantized_model_path: Option<String>,
    #[serde(default)]
    pub tokenizer_path: Option<String>,
    #[serde(default)]
    pub tokenizer_config_path: Option<String>,
}

fn default_batch_size() -> usize {
    32
}
fn default_embedding_model() -> String {
    "BGESmallENV15".to_string()
}
fn default_pool_size() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            model: default_embedding_model(),
            cache_dir: None,
            pool_size: default_pool_size(),
            quantized_model_path: None,
            tokenizer_path: None,
            tokenizer_config_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reranker_model_dir")]
    pub model_dir: String,
    #[serde(default = "default_reranker_model_url")]
    pub model_url: Option<String>,
    #[serde(default = "default_reranker_tokenizer_url")]
    pub tokenizer_url: Option<String>,
    /// HuggingFace model id used for auto-download when `model_url` is unset.
    /// Defaults to a cross-encoder text-pair classification model.
    #[serde(default = "default_reranker_model_id")]
    pub model_id: String,
}

fn default_reranker_enabled() -> bool {
    true
}
fn default_reranker_model_dir() -> String {
    ".vibescout/data/models/reranker".to_string()
}
fn default_reranker_model_url() -> Option<String> {
    None
}
fn default_reranker_tokenizer_url() -> Option<String> {
    None
}
fn default_reranker_model_id() -> String {
    "BAAI/bge-reranker-base".to_string()
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: default_reranker_enabled(),
            model_dir: default_reranker_model_dir(),
            model_url: None,
            tokenizer_url: None,
            model_id: default_reranker_model_id(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummarizerTomlConfig {
    #[serde(default)]
    pub enable_llm: bool,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

fn default_model_id() -> String {
    "qwen2.5-coder:1.5b".to_string()
}
fn default_max_tokens() -> usize {
    150
}
fn default_temperature() -> f64 {
    0.3
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for SummarizerTomlConfig {
    fn default() -> Self {
        Self {
            enable_llm: true,
            model_id: default_model_id(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            ollama_url: default_ollama_url(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct DomainsConfig {
    #[serde(default)]
    pub rs_paths: Vec<String>,
    #[serde(default)]
    pub py_paths: Vec<String>,
    #[serde(default)]
    pub frontend_paths: Vec<String>,
    #[serde(default)]
    pub ops_paths: Vec<String>,
    #[serde(default)]
    pub shared_paths: Vec<String>,
}

/// Which backend each capability (embeddings / summarization / vector store)
/// should use, plus the credentials each backend needs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    #[serde(default = "default_db_provider")]
    pub db_provider: String,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub ollama_url: Option<String>,
    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub cloudflare_account_id: Option<String>,
    #[serde(default)]
    pub cloudflare_token: Option<String>,
    #[serde(default)]
    pub cloudflare_vectorize_index: Option<String>,
    #[serde(default)]
    pub gemini_key: Option<String>,
    #[serde(default)]
    pub zai_key: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub aws_profile: Option<String>,
    #[serde(default)]
    pub models_path: Option<String>,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_db_provider() -> String {
    "lancedb".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            llm_provider: default_provider(),
            db_provider: default_db_provider(),
            offline: false,
            ollama_url: None,
            openai_key: None,
            openai_base_url: None,
            cloudflare_account_id: None,
            cloudflare_token: None,
            cloudflare_vectorize_index: None,
            gemini_key: None,
            zai_key: None,
            aws_region: None,
            aws_profile: None,
            models_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_use_reranker")]
    pub use_reranker: bool,
    #[serde(default = "default_embed_file_path")]
    pub embed_file_path: String,
}

fn default_min_score() -> f32 {
    0.4
}
fn default_use_reranker() -> bool {
    true
}
fn default_embed_file_path() -> String {
    "full".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            use_reranker: default_use_reranker(),
            embed_file_path: default_embed_file_path(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitIntegrationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub embed_in_vector: bool,
    #[serde(default)]
    pub store_as_metadata: bool,
    /// Churn window in months used for commit-count classification.
    #[serde(default = "default_churn_window")]
    pub churn_window: u32,
}

fn default_true() -> bool {
    true
}
fn default_churn_window() -> u32 {
    6
}

impl Default for GitIntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            embed_in_vector: default_true(),
            store_as_metadata: false,
            churn_window: default_churn_window(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PromptTemplate {
    pub id: String,
    pub template: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PromptsConfig {
    #[serde(default)]
    pub summarize_templates: Vec<PromptTemplate>,
    #[serde(default)]
    pub active_summarize_id: Option<String>,
    #[serde(default)]
    pub chunk_summarize: Option<String>,
    #[serde(default)]
    pub doc_summarize_templates: Vec<PromptTemplate>,
    #[serde(default)]
    pub active_doc_summarize_id: Option<String>,
    #[serde(default)]
    pub best_question: Option<String>,
    #[serde(default)]
    pub chat_response: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileTypeConfig {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub summarize: Option<bool>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default = "default_true")]
    pub index: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Load configuration from `<dir>/config.toml`, falling back to defaults
/// for a missing file or any field the file omits.
pub fn load_config(dir: &Path) -> VibescoutConfig {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return VibescoutConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("failed to parse config.toml: {}", e);
            VibescoutConfig::default()
        }),
        Err(e) => {
            tracing::warn!("failed to read config.toml: {}", e);
            VibescoutConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.server.port, 10987);
        assert_eq!(cfg.search.min_score, 0.4);
        assert_eq!(cfg.providers.provider, "ollama");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[search]\nmin_score = 0.7\n",
        )
        .unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.search.min_score, 0.7);
        assert_eq!(cfg.search.use_reranker, true);
        assert_eq!(cfg.embedding.model, "BGESmallENV15");
    }
}
