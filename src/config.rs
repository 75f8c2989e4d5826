use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Deployment mode controlling auth bypass, CORS policy, and ingestion mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    /// Developer workstation: no credentials, permissive CORS, synchronous ingestion.
    Local,
    /// Hosted deployment: credentials enforced, rate limited, background ingestion.
    Production,
}

impl Environment {
    /// Short label used in persisted index paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "prod",
        }
    }

    /// Whether production safeguards apply.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Self::Local),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic in-process hashing encoder.
    Local,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
}

impl EmbeddingProvider {
    /// Identifier recorded in persisted index metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "hashed" | "sentence_transformers" => Ok(Self::Local),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Supported answer-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// OpenAI chat completions.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Runtime configuration for the question-answering server.
#[derive(Clone, Debug)]
pub struct Config {
    /// Deployment mode.
    pub environment: Environment,
    /// Embedding provider used to vectorize chunks and questions.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Vector size produced by the local hashing encoder.
    pub embedding_dimension: usize,
    /// Directory holding the source corpus.
    pub docs_path: PathBuf,
    /// Root directory for persisted indexes.
    pub index_root: PathBuf,
    /// Maximum admitted queries per identity per minute.
    pub rate_limit_per_minute: usize,
    /// Origins allowed by the production CORS policy.
    pub cors_allowed_origins: Vec<String>,
    /// Backend used to generate answers.
    pub llm_provider: GenerationProvider,
    /// Model identifier used for answer generation.
    pub llm_model: String,
    /// Sampling temperature for answer generation.
    pub llm_temperature: f32,
    /// Retrieval depth when a query omits `k`.
    pub default_k: usize,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// OpenAI credential, shared by embeddings and generation.
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible API base URL.
    pub openai_base_url: String,
    /// Ollama base URL.
    pub ollama_url: String,
    /// Secret expected in `X-API-Key` for queries in production.
    pub api_key: String,
    /// Secret expected in `X-Admin-Key` for ingestion in production.
    pub admin_api_key: String,
    /// HTTP listen port.
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            embedding_provider: EmbeddingProvider::Local,
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            embedding_dimension: 384,
            docs_path: PathBuf::from("./data"),
            index_root: PathBuf::from("./.data/index"),
            rate_limit_per_minute: 60,
            cors_allowed_origins: Vec::new(),
            llm_provider: GenerationProvider::OpenAI,
            llm_model: "gpt-4o-mini".into(),
            llm_temperature: 0.0,
            default_k: 4,
            chunk_size: 1000,
            chunk_overlap: 200,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            ollama_url: "http://127.0.0.1:11434".into(),
            api_key: String::new(),
            admin_api_key: String::new(),
            server_port: 8000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults for unset values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            environment: parse_env("ENV", defaults.environment, |value| value.parse().ok())?,
            embedding_provider: parse_env("EMBEDDINGS_PROVIDER", defaults.embedding_provider, |value| {
                value.parse().ok()
            })?,
            embedding_model: load_env_optional("EMBEDDINGS_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", defaults.embedding_dimension, |value| {
                value.parse::<usize>().ok().filter(|dimension| *dimension > 0)
            })?,
            docs_path: load_env_optional("DOCS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.docs_path),
            index_root: load_env_optional("INDEX_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_root),
            rate_limit_per_minute: parse_env(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
                |value| value.parse().ok(),
            )?,
            cors_allowed_origins: load_env_optional("CORS_ALLOWED_ORIGINS")
                .map(|value| split_list(&value))
                .unwrap_or_default(),
            llm_provider: parse_env("LLM_PROVIDER", defaults.llm_provider, |value| value.parse().ok())?,
            llm_model: load_env_optional("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_temperature: parse_env("LLM_TEMPERATURE", defaults.llm_temperature, |value| {
                value.parse::<f32>().ok().filter(|temperature| temperature.is_finite())
            })?,
            default_k: parse_env("DEFAULT_K", defaults.default_k, |value| {
                value.parse::<usize>().ok().filter(|k| *k > 0)
            })?,
            chunk_size: parse_env("CHUNK_SIZE", defaults.chunk_size, |value| {
                value.parse::<usize>().ok().filter(|size| *size > 0)
            })?,
            chunk_overlap: parse_env("CHUNK_OVERLAP", defaults.chunk_overlap, |value| value.parse().ok())?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            ollama_url: load_env_optional("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            api_key: load_env_optional("API_KEY").unwrap_or_default(),
            admin_api_key: load_env_optional("ADMIN_API_KEY").unwrap_or_default(),
            server_port: parse_env("SERVER_PORT", defaults.server_port, |value| value.parse().ok())?,
        })
    }

    /// Directory holding the persisted index for the active environment and embedding model.
    ///
    /// Slashes in the model name are flattened so `org/model` maps to a single directory.
    pub fn index_path(&self) -> PathBuf {
        self.index_root
            .join(self.environment.as_str())
            .join(self.embedding_model.replace('/', "_"))
    }

    /// Emit the effective settings. Call once a subscriber is installed.
    pub fn log_summary(&self) {
        tracing::info!(
            environment = self.environment.as_str(),
            embedding_provider = %self.embedding_provider,
            embedding_model = %self.embedding_model,
            docs_path = %self.docs_path.display(),
            rate_limit_per_minute = self.rate_limit_per_minute,
            server_port = self.server_port,
            "Loaded configuration"
        );
    }
}

fn parse_env<T>(
    key: &str,
    default: T,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => parse(value.trim()).ok_or_else(|| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}
