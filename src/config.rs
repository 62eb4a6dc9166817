//! Defaults, then a TOML file, then `REELINDEX__SECTION__KEY`, then CLI flags.

use crate::vector_store::Metric;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE: &str = "reelindex";
const ENV_PREFIX: &str = "REELINDEX";
const API_KEY_FALLBACK_ENV: &str = "PINECONE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Local,
    Pinecone,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Pinecone => "pinecone",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub pinecone: PineconeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub index_name: String,
    pub top_k: usize,
    pub include_values: bool,
    pub include_metadata: bool,
    pub upsert_batch_size: usize,
    pub metric: Metric,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: Backend,
    pub local_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PineconeConfig {
    #[serde(default)]
    pub api_key: String,
    pub controller_url: String,
    pub cloud: String,
    pub region: String,
    pub timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub ready_poll_ms: u64,
}

impl PineconeConfig {
    /// Configured key, else `PINECONE_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        let key = self.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        std::env::var(API_KEY_FALLBACK_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub input_path: Option<PathBuf>,
    pub index_name: Option<String>,
    pub top_k: Option<usize>,
    pub backend: Option<Backend>,
}

pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<AppConfig, ConfigError> {
    let file_source = match file {
        Some(path) => File::from(path).required(true),
        None => File::with_name(CONFIG_FILE).required(false),
    };

    let builder = Config::builder()
        .set_default("pipeline.input_path", "include/moviedata.txt")?
        .set_default("pipeline.index_name", "testindex")?
        .set_default("pipeline.top_k", 10_i64)?
        .set_default("pipeline.include_values", true)?
        .set_default("pipeline.include_metadata", true)?
        .set_default("pipeline.upsert_batch_size", 100_i64)?
        .set_default("pipeline.metric", "cosine")?
        .set_default("store.backend", "local")?
        .set_default("store.local_path", "memory/vectors.json")?
        .set_default("pinecone.api_key", "")?
        .set_default("pinecone.controller_url", "https://api.pinecone.io")?
        .set_default("pinecone.cloud", "aws")?
        .set_default("pinecone.region", "us-east-1")?
        .set_default("pinecone.timeout_secs", 30_i64)?
        .set_default("pinecone.ready_timeout_secs", 300_i64)?
        .set_default("pinecone.ready_poll_ms", 2_000_i64)?
        .add_source(file_source)
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .set_override_option(
            "pipeline.input_path",
            overrides
                .input_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        )?
        .set_override_option("pipeline.index_name", overrides.index_name.clone())?
        .set_override_option("pipeline.top_k", overrides.top_k.map(|k| k as i64))?
        .set_override_option("store.backend", overrides.backend.map(Backend::as_str))?;

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.top_k == 0 {
            return Err(ConfigError::Invalid("pipeline.top_k must be at least 1".into()));
        }
        if p.upsert_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.upsert_batch_size must be at least 1".into(),
            ));
        }
        validate_index_name(&p.index_name)?;
        if self.store.backend == Backend::Pinecone && self.pinecone.resolved_api_key().is_none() {
            return Err(ConfigError::Invalid(format!(
                "pinecone backend needs pinecone.api_key or {API_KEY_FALLBACK_ENV}"
            )));
        }
        Ok(())
    }
}

/// Index names are 1-45 characters of lowercase ASCII letters, digits and
/// hyphens, not starting or ending with a hyphen.
pub fn validate_index_name(name: &str) -> Result<(), ConfigError> {
    let well_formed = !name.is_empty()
        && name.len() <= 45
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("invalid index name `{name}`")))
    }
}
