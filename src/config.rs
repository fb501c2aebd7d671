//! TOML configuration.
//!
//! Every section except `[data]` is optional and falls back to the defaults
//! below. [`load_config`] parses the file and validates ranges before
//! anything else touches the values.
//!
//! ```toml
//! [data]
//! path = "./data/maharashtra-forts.csv"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [clustering]
//! n_clusters = 8
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! cache_dir = "./data/embeddings_cache"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// CSV file holding the fort catalog.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Default result sizes for list and recommendation queries.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_nearby_k")]
    pub nearby_k: usize,
    #[serde(default = "default_similar_k")]
    pub similar_k: usize,
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            list_limit: default_list_limit(),
            nearby_k: default_nearby_k(),
            similar_k: default_similar_k(),
            semantic_top_k: default_semantic_top_k(),
        }
    }
}

fn default_list_limit() -> usize {
    10
}
fn default_nearby_k() -> usize {
    10
}
fn default_similar_k() -> usize {
    5
}
fn default_semantic_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            seed: default_seed(),
            max_iter: default_max_iter(),
            n_init: default_n_init(),
        }
    }
}

fn default_n_clusters() -> usize {
    8
}
fn default_seed() -> u64 {
    42
}
fn default_max_iter() -> usize {
    300
}
fn default_n_init() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Transport retries for HTTP providers. The index itself never retries.
    #[serde(default)]
    pub max_retries: u32,
    /// Directory for the persisted embedding cache. No caching when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            cache_dir: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Configuration pointing at a catalog file, everything else defaulted.
    pub fn with_data_path(path: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { path: path.into() },
            server: ServerConfig::default(),
            retrieval: RetrievalConfig::default(),
            clustering: ClusteringConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative data and cache paths resolve against the config file's directory.
    if let Some(base) = path.parent() {
        if config.data.path.is_relative() {
            config.data.path = base.join(&config.data.path);
        }
        if let Some(dir) = config.embedding.cache_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.list_limit == 0 || r.nearby_k == 0 || r.similar_k == 0 || r.semantic_top_k == 0 {
        anyhow::bail!("retrieval limits must be >= 1");
    }

    let c = &config.clustering;
    if c.n_clusters == 0 {
        anyhow::bail!("clustering.n_clusters must be >= 1");
    }
    if c.max_iter == 0 || c.n_init == 0 {
        anyhow::bail!("clustering.max_iter and clustering.n_init must be >= 1");
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match e.provider.as_str() {
        "disabled" | "local" => {}
        "ollama" => {
            if e.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if e.dims.is_none() || e.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or ollama.",
            other
        ),
    }

    Ok(())
}
