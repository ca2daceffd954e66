//! TOML configuration parsing.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! that keeps all data under `./data` and runs with providers disabled.
//! Secrets are never read from the file: provider constructors pull
//! `OPENAI_API_KEY` from the environment (optionally seeded from `.env`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub embedding: ProviderConfig,
    #[serde(default)]
    pub llm: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides `{data_dir}/uploads`.
    #[serde(default)]
    pub uploads_dir: Option<PathBuf>,
    /// Overrides `{data_dir}/registry.sqlite3`.
    #[serde(default)]
    pub registry_db: Option<PathBuf>,
    /// Overrides `{data_dir}/conversations.sqlite3`.
    #[serde(default)]
    pub conversations_db: Option<PathBuf>,
    /// Overrides `{data_dir}/index.sqlite3`.
    #[serde(default)]
    pub index_db: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            uploads_dir: None,
            registry_db: None,
            conversations_db: None,
            index_db: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl PathsConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    pub fn registry_db(&self) -> PathBuf {
        self.registry_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("registry.sqlite3"))
    }

    pub fn conversations_db(&self) -> PathBuf {
        self.conversations_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("conversations.sqlite3"))
    }

    pub fn index_db(&self) -> PathBuf {
        self.index_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index.sqlite3"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Measure `chunk_size`/`overlap` in cl100k tokens instead of characters.
    #[serde(default = "default_true")]
    pub use_tiktoken: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            use_tiktoken: true,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Weight applied to lexical reciprocal-rank contributions, in `[0, 1]`.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            lexical_weight: default_lexical_weight(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_lexical_weight() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_history_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_rewrite_max_messages")]
    pub rewrite_max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_history_max_messages(),
            max_chars: default_history_max_chars(),
            rewrite_max_messages: default_rewrite_max_messages(),
        }
    }
}

fn default_history_max_messages() -> usize {
    12
}
fn default_history_max_chars() -> usize {
    1200
}
fn default_rewrite_max_messages() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_input_length: default_max_input_length(),
        }
    }
}

fn default_max_input_length() -> usize {
    4000
}

/// Shared shape of the `[embedding]` and `[llm]` sections.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL; defaults per provider (`https://api.openai.com`, `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
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
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A configuration rooted at `data_dir` with every other value defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: data_dir.into(),
                ..PathsConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.lexical_weight) {
            anyhow::bail!("retrieval.lexical_weight must be in [0.0, 1.0]");
        }

        if self.safety.max_input_length == 0 {
            anyhow::bail!("safety.max_input_length must be > 0");
        }

        for (section, provider) in [("embedding", &self.embedding), ("llm", &self.llm)] {
            match provider.provider.as_str() {
                "disabled" | "openai" | "ollama" => {}
                other => anyhow::bail!(
                    "Unknown {} provider: '{}'. Must be disabled, openai, or ollama.",
                    section,
                    other
                ),
            }
            if provider.is_enabled() && provider.model.is_none() {
                anyhow::bail!(
                    "{}.model must be specified when provider is '{}'",
                    section,
                    provider.provider
                );
            }
        }

        Ok(())
    }
}

/// Load and validate a configuration file.
///
/// A missing file is not an error: the defaults are used, which lets
/// `gqa init` bootstrap a fresh data directory without any setup.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 4);
        assert!((config.retrieval.lexical_weight - 0.4).abs() < 1e-9);
        assert_eq!(config.history.max_messages, 12);
        assert_eq!(config.safety.max_input_length, 4000);
        assert!(!config.embedding.is_enabled());
        assert_eq!(
            config.paths.registry_db(),
            PathBuf::from("./data/registry.sqlite3")
        );
    }

    #[test]
    fn test_rejects_out_of_range_lexical_weight() {
        let config: Config = toml::from_str("[retrieval]\nlexical_weight = 1.5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        let config: Config =
            toml::from_str("[chunking]\nchunk_size = 100\noverlap = 100\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let config: Config = toml::from_str("[llm]\nprovider = \"openai\"\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("llm.model"), "{}", err);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_overrides() {
        let config: Config = toml::from_str(
            "[paths]\ndata_dir = \"/srv/qa\"\nindex_db = \"/tmp/idx.db\"\n",
        )
        .unwrap();
        assert_eq!(config.paths.uploads_dir(), PathBuf::from("/srv/qa/uploads"));
        assert_eq!(config.paths.index_db(), PathBuf::from("/tmp/idx.db"));
    }
}
