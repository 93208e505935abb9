use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::ChunkingConfig;
use crate::error::{RecallError, Result};
use crate::source::SourceSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub sources: SourcesConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub facts: FactsConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub memory_file: String,
    pub memory_dir: String,
    pub extension: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            memory_file: "~/clawd/MEMORY.md".to_string(),
            memory_dir: "~/clawd/memory".to_string(),
            extension: "md".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_file: String,
    pub chunk_index_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: "~/.atlas/index_state.json".to_string(),
            chunk_index_dir: "~/.atlas/chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Per-backend bound on a single search call.
    pub timeout_ms: u64,
    /// Each backend is asked for `limit * oversample` hits before merging.
    pub oversample: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 5, timeout_ms: 10_000, oversample: 2 }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub user_id: String,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self { enabled: true, base_url: "http://localhost:8000".to_string(), user_id: "atlas".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub base_url: String,
    pub agent_name: String,
    /// Archival search returns no score; every hit gets this one.
    pub score: f32,
    /// Mirror each indexed file into the archive as one passage.
    pub mirror_documents: bool,
    /// Characters of a file kept in its mirrored passage.
    pub passage_chars: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8283".to_string(),
            agent_name: "atlas".to_string(),
            score: 0.3,
            mirror_documents: true,
            passage_chars: 2000,
        }
    }
}

impl RecallConfig {
    /// Defaults, then `config.toml`, `config.<RUST_ENV>.toml`, the explicit
    /// file if any, then `RECALL_*` variables (`__` separates sections).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(RecallConfig::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(RecallError::InvalidConfig(format!("config file not found: {}", path.display())));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("RECALL_").split("__"));
        Self::from_figment(&figment)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| RecallError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.target_size == 0 {
            return Err(RecallError::InvalidConfig("chunking.target_size must be positive".into()));
        }
        if c.min_section_size >= c.target_size {
            return Err(RecallError::InvalidConfig("chunking.min_section_size must be below target_size".into()));
        }
        if self.search.timeout_ms == 0 {
            return Err(RecallError::InvalidConfig("search.timeout_ms must be positive".into()));
        }
        if self.search.default_limit == 0 || self.search.oversample == 0 {
            return Err(RecallError::InvalidConfig("search.default_limit and search.oversample must be positive".into()));
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        expand_path(&self.storage.state_file)
    }

    pub fn chunk_index_dir(&self) -> PathBuf {
        expand_path(&self.storage.chunk_index_dir)
    }

    pub fn source_set(&self) -> SourceSet {
        SourceSet {
            memory_file: expand_path(&self.sources.memory_file),
            memory_dir: expand_path(&self.sources.memory_dir),
            extension: self.sources.extension.clone(),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
