
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::retrieval::MAX_SEARCH_LIMIT;

/// Overrides the base directory when set
pub const HOME_ENV_VAR: &str = "KNOWLEDGE_RAG_HOME";

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const MAX_FILE_SIZE_CEILING: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Embedding model
    pub model: String,
    /// Concurrent embedding requests while ingesting
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Characters in a lexical match snippet
    pub snippet_length: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            default_limit: 10,
            snippet_length: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Chat completion model, served by the same Ollama instance
    pub model: String,
    /// Chunks retrieved as context for each question
    pub context_chunks: usize,
    /// Earlier messages replayed to the model
    pub history_messages: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    #[inline]
    fn default() -> Self {
        Self {
            model: "llama3.2:latest".to_string(),
            context_chunks: 5,
            history_messages: 10,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted upload, in bytes
    pub max_file_size: u64,
}

impl Default for UploadConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be between 100 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({1}) must be smaller than chunk size ({0})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid default search limit: {0} (must be between 1 and 50)")]
    InvalidSearchLimit(usize),
    #[error("Invalid snippet length: {0} (must be between 20 and 2000)")]
    InvalidSnippetLength(usize),
    #[error("Invalid context chunk count: {0} (must be between 1 and 20)")]
    InvalidContextChunks(usize),
    #[error("Invalid history length: {0} (must be between 0 and 50)")]
    InvalidHistoryMessages(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid max file size: {0} bytes (must be between 1 byte and 1 GiB)")]
    InvalidMaxFileSize(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Defaults rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            ollama: OllamaConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
            uploads: UploadConfig::default(),
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// `$KNOWLEDGE_RAG_HOME`, else `~/.knowledge-rag`, else the platform
    /// data directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(home));
        }

        dirs::home_dir()
            .map(|home| home.join(".knowledge-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("knowledge-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.validate_retrieval_config()?;
        self.chat.validate()?;

        if !(1..=MAX_FILE_SIZE_CEILING).contains(&self.uploads.max_file_size) {
            return Err(ConfigError::InvalidMaxFileSize(self.uploads.max_file_size));
        }
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_size,
                config.overlap,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(1..=MAX_SEARCH_LIMIT).contains(&config.default_limit) {
            return Err(ConfigError::InvalidSearchLimit(config.default_limit));
        }

        if !(20..=2000).contains(&config.snippet_length) {
            return Err(ConfigError::InvalidSnippetLength(config.snippet_length));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// SQLite metadata database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// LanceDB vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// Stored copies of uploaded files
    #[inline]
    pub fn uploads_dir(&self) -> PathBuf {
        self.get_base_dir().join("uploads")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let candidate = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        candidate.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl ChatConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=20).contains(&self.context_chunks) {
            return Err(ConfigError::InvalidContextChunks(self.context_chunks));
        }

        if self.history_messages > 50 {
            return Err(ConfigError::InvalidHistoryMessages(self.history_messages));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=32768).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}
