//! Configuration parsing and validation.
//!
//! Engram is configured via a TOML file (default: `./engram.toml`), with
//! `ENGRAM_*` environment variables layered on top and command-line flags
//! layered on top of those (precedence: flag > env > file > default).
//! Validation happens once, after all layers are applied.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/engram.sqlite"
//!
//! [embedding]
//! provider = "local"
//! local_model = "nomic-embed-text-v1.5"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [kb]
//! root = "./kb"
//!
//! [server]
//! http_addr = "127.0.0.1:7800"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub kb: KbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub code: CodeConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Path of the SQLite database file. Parent directories are created.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/engram.sqlite")
}

/// One embedding provider endpoint. Selection priority when `provider` is
/// unset: local model, then Ollama, then OpenAI-compatible API.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmbeddingConfig {
    /// Force a provider: `"local"`, `"ollama"`, or `"openai"`. When absent,
    /// the first configured provider in priority order wins.
    #[serde(default)]
    pub provider: Option<String>,
    /// Local model name (e.g. `"nomic-embed-text-v1.5"`).
    #[serde(default)]
    pub local_model: Option<String>,
    /// Thread count for local inference. Defaults to the runtime's choice.
    #[serde(default)]
    pub local_threads: Option<usize>,
    #[serde(default)]
    pub ollama_url: Option<String>,
    #[serde(default)]
    pub ollama_model: Option<String>,
    /// OpenAI-compatible endpoint. The key comes from `OPENAI_API_KEY` only;
    /// it is never read from the config file.
    #[serde(default)]
    pub openai_url: Option<String>,
    #[serde(default)]
    pub openai_model: Option<String>,
    /// Reported dimensionality for remote providers.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Independent provider for code embeddings; falls back to this one.
    #[serde(default)]
    pub code: Option<Box<EmbeddingConfig>>,
}

fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Resolve which provider this config selects, honoring the explicit
    /// `provider` override first and configuration presence otherwise.
    pub fn resolved_provider(&self) -> Option<&str> {
        if let Some(p) = self.provider.as_deref() {
            return Some(p);
        }
        if self.local_model.is_some() {
            return Some("local");
        }
        if self.ollama_model.is_some() || self.ollama_url.is_some() {
            return Some("ollama");
        }
        if self.openai_model.is_some() || self.openai_url.is_some() {
            return Some("openai");
        }
        None
    }

    pub fn is_enabled(&self) -> bool {
        self.resolved_provider().is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks; clamped to
    /// `chunk_size / 4` when not strictly smaller than `chunk_size`.
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
    800
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KbConfig {
    /// Directory mirroring knowledge-base documents as Markdown files.
    /// When unset, documents live only in the datastore.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    /// Bind address of the plain HTTP JSON surface. When unset, only the
    /// stdio transport runs.
    #[serde(default)]
    pub http_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeConfig {
    /// Re-activate file watchers for watched projects on startup.
    #[serde(default = "default_true")]
    pub watch_enabled: bool,
    /// Indexing worker count. Defaults to `min(cpu, 4)`.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Pending-job queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Extra glob patterns excluded from every walk, on top of
    /// `.gitignore` and the built-in ignore list.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            watch_enabled: true,
            workers: None,
            queue_capacity: default_queue_capacity(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// Append logs to this file in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Suppress stderr logging entirely (keeps the stdio transport clean).
    #[serde(default)]
    pub quiet_stdio: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModulesConfig {
    /// Module ids to skip at provisioning time.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl CodeConfig {
    /// Effective worker-pool size.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        })
    }
}

/// Load the TOML file (when present), apply `ENGRAM_*` environment
/// overrides, and validate. A missing file is not an error — defaults plus
/// env/flags may form a complete configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Apply `ENGRAM_*` environment variables on top of file values.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("ENGRAM_DB_PATH") {
        config.db.path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_EMBEDDING_PROVIDER") {
        config.embedding.provider = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_LOCAL_MODEL") {
        config.embedding.local_model = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_OLLAMA_URL") {
        config.embedding.ollama_url = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_OLLAMA_MODEL") {
        config.embedding.ollama_model = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_OPENAI_URL") {
        config.embedding.openai_url = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_OPENAI_MODEL") {
        config.embedding.openai_model = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_CHUNK_SIZE") {
        if let Ok(n) = v.parse() {
            config.chunking.chunk_size = n;
        }
    }
    if let Ok(v) = std::env::var("ENGRAM_CHUNK_OVERLAP") {
        if let Ok(n) = v.parse() {
            config.chunking.chunk_overlap = n;
        }
    }
    if let Ok(v) = std::env::var("ENGRAM_KB_ROOT") {
        config.kb.root = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ENGRAM_HTTP_ADDR") {
        config.server.http_addr = Some(v);
    }
    if let Ok(v) = std::env::var("ENGRAM_LOG_FILE") {
        config.log.file = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ENGRAM_CODE_WATCH") {
        config.code.watch_enabled = v != "0" && !v.eq_ignore_ascii_case("false");
    }
    if let Ok(v) = std::env::var("ENGRAM_CODE_WORKERS") {
        if let Ok(n) = v.parse() {
            config.code.workers = Some(n);
        }
    }
}

/// Validate the fully layered configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::Config("chunking.chunk_size must be > 0".into()));
    }

    match config.embedding.resolved_provider() {
        None => {
            return Err(Error::Config(
                "no embedding provider configured: set embedding.local_model, \
                 embedding.ollama_model, or embedding.openai_model"
                    .into(),
            ))
        }
        Some("local") | Some("ollama") | Some("openai") => {}
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown embedding provider '{}': use local, ollama, or openai",
                other
            )))
        }
    }

    if config.embedding.resolved_provider() == Some("ollama")
        && config.embedding.ollama_model.is_none()
    {
        return Err(Error::Config(
            "embedding.ollama_model is required for the ollama provider".into(),
        ));
    }
    if config.embedding.resolved_provider() == Some("openai")
        && config.embedding.openai_model.is_none()
    {
        return Err(Error::Config(
            "embedding.openai_model is required for the openai provider".into(),
        ));
    }

    if let Some(code) = &config.embedding.code {
        match code.resolved_provider() {
            None | Some("local") | Some("ollama") | Some("openai") => {}
            Some(other) => {
                return Err(Error::Config(format!(
                    "unknown code embedding provider '{}'",
                    other
                )))
            }
        }
    }

    if let Some(addr) = &config.server.http_addr {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "server.http_addr is not a socket address: {}",
                addr
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> &'static str {
        r#"
            [db]
            path = "/tmp/engram-test.sqlite"

            [embedding]
            local_model = "nomic-embed-text-v1.5"
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(base_toml()).unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.embedding.resolved_provider(), Some("local"));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn provider_priority_local_first() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            local_model = "nomic-embed-text-v1.5"
            ollama_model = "nomic-embed-text"
            openai_model = "text-embedding-3-small"
        "#,
        )
        .unwrap();
        assert_eq!(config.embedding.resolved_provider(), Some("local"));
    }

    #[test]
    fn provider_priority_ollama_over_openai() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            ollama_model = "nomic-embed-text"
            openai_model = "text-embedding-3-small"
        "#,
        )
        .unwrap();
        assert_eq!(config.embedding.resolved_provider(), Some("ollama"));
    }

    #[test]
    fn explicit_provider_wins() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            provider = "openai"
            local_model = "nomic-embed-text-v1.5"
            openai_model = "text-embedding-3-small"
        "#,
        )
        .unwrap();
        assert_eq!(config.embedding.resolved_provider(), Some("openai"));
    }

    #[test]
    fn missing_embedder_rejected() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/x.sqlite\"").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("no embedding provider"));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            local_model = "nomic-embed-text-v1.5"
            [chunking]
            chunk_size = 0
        "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bad_http_addr_rejected() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            local_model = "nomic-embed-text-v1.5"
            [server]
            http_addr = "not-an-addr"
        "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn worker_count_capped_at_four() {
        let code = CodeConfig::default();
        assert!(code.worker_count() >= 1 && code.worker_count() <= 4);
        let code = CodeConfig {
            workers: Some(9),
            ..Default::default()
        };
        assert_eq!(code.worker_count(), 9);
    }
}
