//! TOML configuration parsing and validation.
//!
//! Configuration is read once at startup and passed explicitly to every
//! component. Secrets and deployment-specific values can be overridden from
//! the environment; the lookup is injectable so tests never mutate the
//! process environment.
//!
//! ```toml
//! [db]
//! url = "postgres://rag@localhost:5432/rag"
//!
//! [access]
//! total_levels = 5
//!
//! [chunking]
//! chunk_size = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tabular: TabularConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Populated from the environment only; never read from the file.
    #[serde(skip)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    #[serde(default = "default_total_levels")]
    pub total_levels: u32,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            total_levels: default_total_levels(),
        }
    }
}

fn default_total_levels() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: 0,
        }
    }
}

fn default_chunk_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_retries: 5,
            timeout_secs: 60,
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct TabularConfig {
    /// Rows shown to the completion model when summarizing a table.
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            preview_rows: default_preview_rows(),
        }
    }
}

fn default_preview_rows() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"local"` or `"s3"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Directory holding objects for the local backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3 endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: None,
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            presign_expiry_secs: default_presign_expiry(),
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_presign_expiry() -> u64 {
    28800
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_concurrent() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Shared secret and salt for signed mutating SQL.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub valid_signature: Option<String>,
    pub salt: String,
}

impl Config {
    /// Every section at its default. Used by commands that can run
    /// without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            access: AccessConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            retrieval: RetrievalConfig::default(),
            tabular: TabularConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
        }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.db
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("db.url is not set (config file or DATABASE_URL)"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse and validate a config document, resolving environment overrides
/// through `env`.
pub fn parse_config<F>(content: &str, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Some(url) = env("DATABASE_URL").filter(|v| !v.is_empty()) {
        config.db.url = Some(url);
    }
    if let Some(levels) = env("TOTAL_ACCESS_LEVELS").filter(|v| !v.is_empty()) {
        config.access.total_levels = levels
            .trim()
            .parse()
            .with_context(|| format!("TOTAL_ACCESS_LEVELS must be an integer, got '{}'", levels))?;
    }
    config.security = SecurityConfig {
        valid_signature: env("VALID_SIGNATURE").filter(|v| !v.is_empty()),
        salt: env("SECRET_SALT").unwrap_or_default(),
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.access.total_levels == 0 {
        bail!("access.total_levels must be > 0");
    }

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.db.max_connections == 0 {
        bail!("db.max_connections must be >= 1");
    }

    if config.server.max_concurrent_requests == 0 {
        bail!("server.max_concurrent_requests must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.completion.is_enabled() && config.completion.model.is_none() {
        bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.storage.bucket.is_none() {
                bail!("storage.bucket must be set when storage.backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("", no_env).unwrap();
        assert_eq!(cfg.access.total_levels, 5);
        assert_eq!(cfg.chunking.chunk_size, 200);
        assert_eq!(cfg.chunking.chunk_overlap, 0);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.tabular.preview_rows, 10);
        assert_eq!(cfg.storage.presign_expiry_secs, 28800);
        assert!(!cfg.embedding.is_enabled());
        assert!(cfg.security.valid_signature.is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://rag@db/rag"),
            ("TOTAL_ACCESS_LEVELS", "3"),
            ("VALID_SIGNATURE", "SAYNOTOSWIPER"),
            ("SECRET_SALT", "S3cr3t"),
        ]
        .into_iter()
        .collect();
        let cfg = parse_config("[access]\ntotal_levels = 9\n", |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(cfg.database_url().unwrap(), "postgres://rag@db/rag");
        assert_eq!(cfg.access.total_levels, 3);
        assert_eq!(cfg.security.valid_signature.as_deref(), Some("SAYNOTOSWIPER"));
        assert_eq!(cfg.security.salt, "S3cr3t");
    }

    #[test]
    fn rejects_zero_levels() {
        let err = parse_config("[access]\ntotal_levels = 0\n", no_env).unwrap_err();
        assert!(err.to_string().contains("total_levels"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let err = parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n", no_env)
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\n", no_env).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let cfg = parse_config(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
            no_env,
        )
        .unwrap();
        assert_eq!(cfg.embedding.dims, Some(1536));
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n", no_env).is_err());
        assert!(parse_config(
            "[completion]\nprovider = \"magic\"\nmodel = \"m\"\n",
            no_env
        )
        .is_err());
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let err = parse_config("[storage]\nbackend = \"s3\"\n", no_env).unwrap_err();
        assert!(err.to_string().contains("storage.bucket"));
    }

    #[test]
    fn bad_total_levels_env_is_an_error() {
        let err = parse_config("", |k| {
            (k == "TOTAL_ACCESS_LEVELS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("TOTAL_ACCESS_LEVELS"));
    }
}
