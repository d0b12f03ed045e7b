use std::path::PathBuf;

use thiserror::Error;

/// Core error type for AI Helper.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing required input: {0}")]
    MissingInput(String),
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read document: {0}")]
    Document(String),
    #[error("no document has been loaded for this session")]
    NoDocumentLoaded,
    #[error("no page has been scraped for this session")]
    NothingScraped,
    #[error("there is no result to send")]
    NothingToSend,
    #[error("model call failed: {0}")]
    Model(String),
    #[error("web search failed: {0}")]
    Search(String),
    #[error("browser automation failed: {0}")]
    Browser(String),
    #[error("failed to send email: {0}")]
    Mail(String),
    #[error("agent {agent} failed: {reason}")]
    Agent { agent: String, reason: String },
    #[error("workflow failed: {0}")]
    Workflow(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HelperError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn missing_input(field: impl Into<String>) -> Self {
        Self::MissingInput(field.into())
    }

    pub fn agent(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure came from the caller's input rather than a collaborator.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::MissingInput(_)
                | Self::UnsupportedFormat(_)
                | Self::NoDocumentLoaded
                | Self::NothingScraped
                | Self::NothingToSend
        )
    }
}

pub type Result<T, E = HelperError> = std::result::Result<T, E>;
