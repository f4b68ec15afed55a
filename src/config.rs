use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FaqgenConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub similarity: SimilarityConfig,
    pub generation: GenerationConfig,
    pub clustering: ClusteringConfig,
    pub assembly: AssemblyConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimilarityConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Minimum average pairwise similarity for two clusters to merge.
    pub similarity_threshold: f64,
    /// Upper bound on the candidate set fed into one clustering pass.
    pub max_candidates: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Clusters smaller than this are discarded (1 permits single-question FAQs).
    pub min_question_count: usize,
    /// Groups with at least this many questions are auto-published.
    pub auto_publish_threshold: usize,
    /// Similarity recorded for non-representative associations on create.
    /// A known approximation: the true pairwise score to the group anchor is
    /// not separately tracked at persistence time.
    pub member_similarity: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub item_timeout_secs: u64,
    pub batch_delay_ms: u64,
    pub max_consecutive_errors: u32,
    pub max_total_errors: u32,
    pub memory_limit_mb: u64,
    /// Proactive reclamation hint every N batches, regardless of the gate.
    pub reclaim_interval_batches: usize,
    /// Delay between chained queue stages, letting prior-stage writes land.
    pub stage_delay_secs: u64,
}

impl Default for FaqgenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            similarity: SimilarityConfig::default(),
            generation: GenerationConfig::default(),
            clustering: ClusteringConfig::default(),
            assembly: AssemblyConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_faqgen_dir()
            .join("faq.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            provider: "remote".into(),
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            model: "text-embedding-3-small".into(),
            api_key_env: "FAQGEN_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "FAQGEN_API_KEY".into(),
            timeout_secs: 60,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_candidates: 200,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            min_question_count: 2,
            auto_publish_threshold: 5,
            member_similarity: 0.85,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            item_timeout_secs: 60,
            batch_delay_ms: 500,
            max_consecutive_errors: 10,
            max_total_errors: 50,
            memory_limit_mb: 512,
            reclaim_interval_batches: 5,
            stage_delay_secs: 5,
        }
    }
}

/// Returns `~/.faqgen/`
pub fn default_faqgen_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".faqgen")
}

/// Returns the default config file path: `~/.faqgen/config.toml`
pub fn default_config_path() -> PathBuf {
    default_faqgen_dir().join("config.toml")
}

impl FaqgenConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            FaqgenConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (FAQGEN_DB, FAQGEN_LOG_LEVEL,
    /// FAQGEN_SIMILARITY_ENDPOINT, FAQGEN_GENERATION_ENDPOINT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FAQGEN_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("FAQGEN_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("FAQGEN_SIMILARITY_ENDPOINT") {
            self.similarity.endpoint = val;
        }
        if let Ok(val) = std::env::var("FAQGEN_GENERATION_ENDPOINT") {
            self.generation.endpoint = val;
        }
    }

    /// Reject values the engines cannot work with.
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.clustering.similarity_threshold),
            "clustering.similarity_threshold must be in [0, 1], got {}",
            self.clustering.similarity_threshold
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.assembly.member_similarity),
            "assembly.member_similarity must be in [0, 1], got {}",
            self.assembly.member_similarity
        );
        anyhow::ensure!(
            self.assembly.min_question_count >= 1,
            "assembly.min_question_count must be at least 1"
        );
        anyhow::ensure!(self.pipeline.batch_size >= 1, "pipeline.batch_size must be at least 1");
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
