//! AI Helper core: document question answering, web extraction, multi-agent
//! research and essay drafting built on `graph_flow`.
//!
//! The [`Assistant`] façade owns the per-session presenter state and wires
//! the pipelines to their collaborators (chat model, vector store, web search,
//! page fetcher, mailer). Front-ends only deal with session ids.

pub mod agent;
mod assistant;
pub mod config;
pub mod documents;
mod error;
pub mod llm;
pub mod logging;
pub mod mail;
pub mod memory;
pub mod prompt;
pub mod scrape;
pub mod search;
mod security;
pub mod session;
pub mod tasks;
pub mod telemetry;
pub mod templates;
mod trace;
pub mod workflow;

pub use agent::{Agent, CurrentDateTool, DynTool, RoleAgent, Tool, WebSearchTool};
pub use assistant::{Assistant, AssistantSettings, Collaborators};
pub use config::{Config, ConfigLoader, OrchestrationMode};
pub use documents::{DocumentFormat, LoadOutcome, TextSplitter};
pub use error::{HelperError, Result};
pub use llm::{ChatModel, DynChatModel, Embedder, HashEmbedder, ScriptedModel};
pub use logging::{RunLog, RunLogEntry};
pub use mail::{Mailer, MemoryMailer, OutgoingMail, SmtpMailer};
pub use memory::{DynRetriever, IngestDocument, LocalRetriever, RetrievedDocument, Retriever};
pub use prompt::{PromptTemplate, PromptedTool};
pub use scrape::{DynPageFetcher, HttpFetcher, PageFetcher, StaticFetcher, WebDriverFetcher};
pub use search::{SearchProvider, SearchResult, StaticSearch, TavilySearch};
pub use security::{SecretValue, require_env};
pub use session::{PipelineKind, Presenter, PresenterState, SessionStore, WorkingMaterial};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary};
pub use workflow::{EssayPipeline, ResearchPipeline, ResearchSettings, WorkflowOutcome};
