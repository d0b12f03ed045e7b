use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{HelperError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "AIHELPER_CONFIG";

/// Top-level configuration structure. Every section has defaults, so an empty
/// (or absent) file yields a usable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub search: SearchConfig,
    pub browser: BrowserConfig,
    pub mail: MailConfig,
    pub documents: DocumentsConfig,
    pub scraper: ScraperConfig,
    pub research: ResearchConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, HelperError> {
        require_env(&self.llm.api_key_env)
    }

    pub fn search_api_key(&self) -> Result<SecretValue, HelperError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument (must exist).
    /// 2. `AIHELPER_CONFIG` environment variable (must exist).
    /// 3. `config.toml` in the current working directory, if present.
    /// 4. Built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, HelperError> {
        let config = match resolve_path(path) {
            Some(candidate) => {
                let raw = fs::read_to_string(&candidate)
                    .map_err(|err| HelperError::config_io(candidate.clone(), err))?;
                Self::parse(&raw)?
            }
            None => Config::default(),
        };

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, HelperError> {
        toml::from_str(raw).map_err(|err| HelperError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), HelperError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(HelperError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }

        let documents = &config.documents;
        if documents.chunk_size == 0 || documents.chunk_overlap >= documents.chunk_size {
            return Err(HelperError::InvalidConfiguration(format!(
                "documents.chunk_overlap ({}) must be smaller than documents.chunk_size ({})",
                documents.chunk_overlap, documents.chunk_size
            )));
        }

        if config.scraper.max_chunk_len == 0 {
            return Err(HelperError::InvalidConfiguration(
                "scraper.max_chunk_len must be positive".into(),
            ));
        }

        if config.research.max_agent_steps == 0 {
            return Err(HelperError::InvalidConfiguration(
                "research.max_agent_steps must be positive".into(),
            ));
        }

        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV)
        && !from_env.trim().is_empty()
    {
        return Some(PathBuf::from(from_env));
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Remote embeddings endpoint sharing the LLM credentials.
    Openai,
    /// Deterministic feature hashing, no network access.
    Hash,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Openai,
            model: "text-embedding-3-small".into(),
            dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.tavily.com/search".into(),
            api_key_env: "TAVILY_API_KEY".into(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserBackend {
    Webdriver,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub backend: BrowserBackend,
    pub webdriver_url: String,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            backend: BrowserBackend::Webdriver,
            webdriver_url: "http://localhost:9515".into(),
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender_env: String,
    pub password_env: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 465,
            sender_env: "SENDER_EMAIL".into(),
            password_env: "GOOGLE_APP_PASSWORD".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub persist_dir: PathBuf,
    pub temperature: Option<f32>,
    /// Qdrant endpoint; the local JSON store is used when unset.
    pub qdrant_url: Option<String>,
    pub qdrant_collection: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
            persist_dir: PathBuf::from("data/vectors"),
            temperature: Some(0.0),
            qdrant_url: None,
            qdrant_collection: "aihelper_documents".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub max_chunk_len: usize,
    pub temperature: Option<f32>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: 6000,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    /// Stages run one after another under program control.
    #[default]
    Sequential,
    /// A supervisor agent receives the stage tools and chooses the order itself.
    Delegated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub mode: OrchestrationMode,
    pub citation_style: String,
    pub max_agent_steps: usize,
    pub temperature: Option<f32>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::Sequential,
            citation_style: "APA".into(),
            max_agent_steps: 8,
            temperature: None,
        }
    }
}

/// Sessions untouched for `idle_ttl_hours` lose their results and vector
/// index. `0` keeps them until they are ended explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_ttl_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_hours: 24,
            sweep_interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory of the JSONL run log; disabled when unset.
    pub run_log_dir: Option<PathBuf>,
    /// Run-log files older than this are pruned; `0` keeps everything.
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            run_log_dir: None,
            retention_days: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ConfigLoader::parse("").expect("empty config parses");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.documents.chunk_size, 1000);
        assert_eq!(config.documents.chunk_overlap, 100);
        assert_eq!(config.scraper.max_chunk_len, 6000);
        assert_eq!(config.research.mode, OrchestrationMode::Sequential);
        assert_eq!(config.sessions.idle_ttl_hours, 24);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let raw = r#"
            [research]
            mode = "delegated"

            [documents]
            top_k = 8
        "#;
        let config = ConfigLoader::parse(raw).expect("config parses");
        assert_eq!(config.research.mode, OrchestrationMode::Delegated);
        assert_eq!(config.research.citation_style, "APA");
        assert_eq!(config.documents.top_k, 8);
        assert_eq!(config.documents.chunk_size, 1000);
    }

    #[test]
    fn load_rejects_overlap_not_smaller_than_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[documents]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();

        let err = ConfigLoader::load(Some(path)).unwrap_err();
        assert!(matches!(err, HelperError::InvalidConfiguration(_)));
    }

    #[test]
    fn load_reports_missing_explicit_file() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/aihelper.toml")))
            .unwrap_err();
        assert!(matches!(err, HelperError::ConfigIo { .. }));
    }
}
