use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docchat server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interface the HTTP server binds to.
    pub server_host: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Origins allowed by the CORS layer (`*` allows any).
    pub allowed_origins: Vec<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime (embeddings and generation).
    pub ollama_url: String,
    /// Provider used to generate answers.
    pub generation_provider: GenerationProvider,
    /// Generation model identifier passed to the provider.
    pub generation_model: String,
    /// API key for the OpenAI-compatible endpoint.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub openai_base_url: String,
    /// Sampling temperature forwarded to the generation provider.
    pub generation_temperature: f32,
    /// Maximum number of tokens the provider may produce per answer.
    pub generation_max_tokens: u32,
    /// Target passage length in words.
    pub chunk_size_words: usize,
    /// Words repeated from the previous passage on the same page.
    pub chunk_overlap_words: usize,
    /// Number of sources surfaced per query.
    pub retrieval_top_k: usize,
    /// Minimum cosine similarity a chunk must reach to be cited.
    pub retrieval_min_score: f32,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic in-process feature hashing.
    Hashing,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported answer generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// No model configured; answers carry a configuration notice.
    None,
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible chat completions API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server_host: load_env_or("SERVER_HOST", DEFAULT_HOST),
            server_port: parse_optional("SERVER_PORT")?,
            allowed_origins: load_env_or("ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            embedding_provider: parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::Hashing)?,
            embedding_model: load_env_or("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 384)?,
            ollama_url: load_env_or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
            generation_provider: parse_or("GENERATION_PROVIDER", GenerationProvider::None)?,
            generation_model: load_env_or("GENERATION_MODEL", "llama3.2"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            generation_temperature: parse_or("GENERATION_TEMPERATURE", 0.7)?,
            generation_max_tokens: parse_or("GENERATION_MAX_TOKENS", 1000)?,
            chunk_size_words: parse_or("CHUNK_SIZE_WORDS", 200)?,
            chunk_overlap_words: parse_or("CHUNK_OVERLAP_WORDS", 30)?,
            retrieval_top_k: parse_or("RETRIEVAL_TOP_K", 5)?,
            retrieval_min_score: parse_or::<f32>("RETRIEVAL_MIN_SCORE", 0.2)?.clamp(-1.0, 1.0),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.chunk_size_words == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE_WORDS".into()));
        }
        if self.chunk_overlap_words >= self.chunk_size_words {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP_WORDS".into()));
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }
        if self.generation_provider == GenerationProvider::OpenAI && self.openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }
        Ok(())
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(key)?.unwrap_or(default))
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" | "hash" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        server_host = %config.server_host,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        embedding_dimension = config.embedding_dimension,
        generation_provider = ?config.generation_provider,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("Ollama".parse(), Ok(EmbeddingProvider::Ollama));
        assert_eq!("hashing".parse(), Ok(EmbeddingProvider::Hashing));
        assert_eq!("OPENAI".parse(), Ok(GenerationProvider::OpenAI));
        assert_eq!("none".parse(), Ok(GenerationProvider::None));
        assert!("qdrant".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn validate_rejects_overlap_not_smaller_than_chunk() {
        let config = Config {
            server_host: DEFAULT_HOST.into(),
            server_port: None,
            allowed_origins: vec!["*".into()],
            embedding_provider: EmbeddingProvider::Hashing,
            embedding_model: "test".into(),
            embedding_dimension: 64,
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            generation_provider: GenerationProvider::None,
            generation_model: "test".into(),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
            generation_temperature: 0.7,
            generation_max_tokens: 1000,
            chunk_size_words: 10,
            chunk_overlap_words: 10,
            retrieval_top_k: 5,
            retrieval_min_score: 0.2,
        };
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "CHUNK_OVERLAP_WORDS"));
    }
}
