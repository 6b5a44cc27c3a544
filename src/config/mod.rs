
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 1000;

/// Environment variables consulted (in order) for the embedding API key.
/// The key is never stored in the config file.
pub const API_KEY_ENV_VARS: &[&str] = &["KB_RETRIEVAL_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 100,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

/// Which engines a query is allowed to use. The effective mode additionally
/// depends on which indexes are actually loadable at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalMode {
    Hybrid,
    VectorOnly,
    LexicalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub max_tokens: usize,
    pub lexical_enabled: bool,
    pub mode: RetrievalMode,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            lexical_enabled: true,
            mode: RetrievalMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database holding the chunk table. Defaults to
    /// `knowledge_base.db` under the config directory.
    pub database_path: Option<PathBuf>,
    /// Directory holding the persisted vector index artifacts. Defaults to
    /// `index` under the config directory.
    pub index_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid API base URL: {0}")]
    InvalidApiBase(String),
    #[error("Invalid model name: cannot be empty")]
    InvalidModel,
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid max_tokens: {0} (must be at least 64)")]
    InvalidMaxTokens(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from `config.toml` in the given directory, falling
    /// back to defaults when the file does not exist. A file that exists but
    /// fails to parse or validate is an error, never silently defaulted.
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                embedding: EmbeddingConfig::default(),
                search: SearchConfig::default(),
                storage: StorageConfig::default(),
                base_dir: config_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.embedding.api_base).is_err() {
            return Err(ConfigError::InvalidApiBase(self.embedding.api_base.clone()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel);
        }
        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }
        if !(1..=1000).contains(&self.embedding.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }
        if !(1..=300).contains(&self.embedding.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.embedding.timeout_seconds));
        }
        if !(1..=100).contains(&self.search.top_k) {
            return Err(ConfigError::InvalidTopK(self.search.top_k));
        }
        if self.search.max_tokens < 64 {
            return Err(ConfigError::InvalidMaxTokens(self.search.max_tokens));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join("knowledge_base.db"))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.storage
            .index_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("index"))
    }

    /// Embedding API key from the environment, if set.
    pub fn api_key(&self) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// The per-user application config directory (`~/.config/kb-retrieval` on
/// Linux). Created on first use.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::DirectoryError)?;
    let dir = base.join("kb-retrieval");
    fs::create_dir_all(&dir).map_err(|_| ConfigError::DirectoryError)?;
    Ok(dir)
}
