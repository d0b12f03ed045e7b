//! Per-session entry point for the four pipelines.
//!
//! Every operation checks its inputs, calls the collaborators and only then
//! writes the session's presenter slot, so a failed call leaves the previous
//! topic, result and working material in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument, warn};

use crate::config::{BrowserBackend, Config, EmbeddingBackend};
use crate::documents::{DocumentFormat, LoadOutcome, TextSplitter, extract_text};
use crate::llm::{
    ChatRequest, DynChatModel, DynEmbedder, HashEmbedder, OpenAiChatModel, OpenAiEmbedder,
};
use crate::logging::{RunLog, RunLogEntry};
use crate::mail::{Mailer, OutgoingMail, SmtpMailer};
use crate::memory::{DynRetriever, IngestDocument, LocalRetriever};
use crate::prompt::inputs;
use crate::scrape::{
    DynPageFetcher, HttpFetcher, WebDriverFetcher, clean_body, extract_body, split_content,
};
use crate::search::{SearchProvider, SearchResult, TavilySearch};
use crate::session::{PipelineKind, Presenter, PresenterState, SessionStore, WorkingMaterial};
use crate::templates;
use crate::workflow::{EssayPipeline, ResearchPipeline, ResearchSettings, WorkflowOutcome};
use crate::{HelperError, Result};

/// External services the pipelines talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub model: DynChatModel,
    pub retriever: DynRetriever,
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: DynPageFetcher,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub research: ResearchSettings,
    pub essay_temperature: Option<f32>,
    pub splitter: TextSplitter,
    pub top_k: usize,
    pub answer_temperature: Option<f32>,
    pub max_chunk_len: usize,
    pub extraction_temperature: Option<f32>,
    pub session_idle_ttl: Option<TimeDelta>,
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            research: ResearchSettings::from_config(&config.research, config.search.max_results),
            essay_temperature: None,
            splitter: TextSplitter::new(
                config.documents.chunk_size,
                config.documents.chunk_overlap,
            )?,
            top_k: config.documents.top_k.max(1),
            answer_temperature: config.documents.temperature,
            max_chunk_len: config.scraper.max_chunk_len,
            extraction_temperature: config.scraper.temperature,
            session_idle_ttl: match config.sessions.idle_ttl_hours {
                0 => None,
                hours => TimeDelta::try_hours(i64::try_from(hours).unwrap_or(i64::MAX)),
            },
        })
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            research: ResearchSettings::default(),
            essay_temperature: None,
            splitter: TextSplitter::default(),
            top_k: 4,
            answer_temperature: Some(0.0),
            max_chunk_len: crate::scrape::DEFAULT_MAX_CHUNK_LEN,
            extraction_temperature: None,
            session_idle_ttl: None,
        }
    }
}

pub struct Assistant {
    collaborators: Collaborators,
    settings: AssistantSettings,
    research: ResearchPipeline,
    essay: EssayPipeline,
    sessions: SessionStore,
    run_log: Option<RunLog>,
}

impl Assistant {
    pub fn new(collaborators: Collaborators, settings: AssistantSettings) -> Self {
        let research = ResearchPipeline::new(
            collaborators.model.clone(),
            collaborators.search.clone(),
            settings.research.clone(),
        );
        let essay = EssayPipeline::new(collaborators.model.clone())
            .with_temperature(settings.essay_temperature);

        Self {
            collaborators,
            settings,
            research,
            essay,
            sessions: SessionStore::new(),
            run_log: None,
        }
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Wire up the hosted collaborators named in `config`.
    ///
    /// The LLM key is required. Missing search or mail credentials only fail
    /// the operations that need them.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.request_timeout_secs.max(1));
        let api_key = config.llm_api_key()?;

        let model: DynChatModel = Arc::new(OpenAiChatModel::new(
            config.llm.base_url.clone(),
            api_key.clone(),
            config.llm.model.clone(),
            timeout,
        )?);

        let embedder: DynEmbedder = match config.embeddings.backend {
            EmbeddingBackend::Openai => Arc::new(OpenAiEmbedder::new(
                config.llm.base_url.clone(),
                api_key,
                config.embeddings.model.clone(),
                timeout,
            )?),
            EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.embeddings.dimensions)),
        };
        let retriever = build_retriever(config, embedder).await?;

        let search: Arc<dyn SearchProvider> = match config.search_api_key() {
            Ok(key) => Arc::new(TavilySearch::new(
                config.search.endpoint.clone(),
                key,
                timeout,
            )?),
            Err(_) => {
                warn!(var = %config.search.api_key_env, "web search disabled: key not set");
                Arc::new(Unavailable::new(&config.search.api_key_env))
            }
        };

        let fetcher: DynPageFetcher = match config.browser.backend {
            BrowserBackend::Webdriver => Arc::new(WebDriverFetcher::new(
                config.browser.webdriver_url.clone(),
                config.browser.headless,
                timeout,
            )?),
            BrowserBackend::Http => Arc::new(HttpFetcher::new(timeout)?),
        };

        let mailer: Arc<dyn Mailer> = match SmtpMailer::from_config(&config.mail) {
            Ok(mailer) => Arc::new(mailer),
            Err(HelperError::MissingSecret(var)) => {
                warn!(%var, "email export disabled: credentials not set");
                Arc::new(Unavailable::new(&var))
            }
            Err(err) => return Err(err),
        };

        let collaborators = Collaborators {
            model,
            retriever,
            search,
            fetcher,
            mailer,
        };
        let mut assistant = Self::new(collaborators, AssistantSettings::from_config(config)?);
        if let Some(dir) = &config.logging.run_log_dir {
            assistant = assistant.with_run_log(RunLog::new(dir, config.logging.retention_days));
        }
        Ok(assistant)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn presenter(&self, session_id: &str, pipeline: PipelineKind) -> Presenter {
        self.sessions.presenter(session_id, pipeline)
    }

    pub fn state(&self, session_id: &str, pipeline: PipelineKind) -> PresenterState {
        self.presenter(session_id, pipeline).state()
    }

    pub fn result(&self, session_id: &str, pipeline: PipelineKind) -> Option<String> {
        self.presenter(session_id, pipeline).result()
    }

    /// Five-stage web research on `topic`; stores the terminal output.
    #[instrument(name = "assistant.research", skip_all, fields(session_id = %session_id))]
    pub async fn research(&self, session_id: &str, topic: &str) -> Result<WorkflowOutcome> {
        let outcome = self.research.run(topic).await?;
        self.finish(
            session_id,
            PipelineKind::Research,
            topic.trim(),
            &outcome.output,
            stages_of(&outcome),
        );
        Ok(outcome)
    }

    #[instrument(name = "assistant.essay", skip_all, fields(session_id = %session_id))]
    pub async fn write_essay(&self, session_id: &str, topic: &str) -> Result<WorkflowOutcome> {
        let outcome = self.essay.run(topic).await?;
        self.finish(
            session_id,
            PipelineKind::Essay,
            topic.trim(),
            &outcome.output,
            stages_of(&outcome),
        );
        Ok(outcome)
    }

    /// Fetch `url` and keep its cleaned body text for later extraction.
    #[instrument(name = "assistant.scrape", skip_all, fields(session_id = %session_id))]
    pub async fn scrape(&self, session_id: &str, url: &str) -> Result<String> {
        let url = required(url, "url")?;
        let html = self.collaborators.fetcher.fetch(url).await?;
        let text = clean_body(&extract_body(&html)?);
        info!(chars = text.chars().count(), "page scraped");

        self.presenter(session_id, PipelineKind::WebScraper)
            .set_material(WorkingMaterial::ScrapedPage {
                url: url.to_string(),
                text: text.clone(),
            });
        Ok(text)
    }

    /// Ask the model for `description` in every chunk of the scraped page.
    #[instrument(name = "assistant.extract", skip_all, fields(session_id = %session_id))]
    pub async fn extract(&self, session_id: &str, description: &str) -> Result<String> {
        let description = required(description, "description")?;
        let presenter = self.presenter(session_id, PipelineKind::WebScraper);
        let Some(WorkingMaterial::ScrapedPage { text, .. }) = presenter.material() else {
            return Err(HelperError::NothingScraped);
        };

        let template = templates::scrape_extraction();
        let chunks = split_content(&text, self.settings.max_chunk_len);
        let total = chunks.len();
        let mut answers = Vec::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let messages = template.render(&inputs([
                ("dom_content", chunk.as_str()),
                ("parse_description", description),
            ]))?;
            let response = self
                .collaborators
                .model
                .chat(ChatRequest::new(messages).with_temperature(self.settings.extraction_temperature))
                .await?;
            let answer = response.content.trim();
            info!(batch = index + 1, total, "parsed batch");
            if !answer.is_empty() && answer != "''" {
                answers.push(answer.to_string());
            }
        }

        let result = answers.join("\n");
        self.finish(
            session_id,
            PipelineKind::WebScraper,
            description,
            &result,
            vec![format!("extract x{total}")],
        );
        Ok(result)
    }

    /// Load a document given its MIME type.
    pub async fn load_document_with_mime(
        &self,
        session_id: &str,
        name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<LoadOutcome> {
        let format = DocumentFormat::from_mime(mime)?;
        self.load_document(session_id, name, format, bytes).await
    }

    /// Extract, split and index a document as the session's only document.
    ///
    /// A document without text yields [`LoadOutcome::NoContent`] and keeps
    /// whatever was indexed before.
    #[instrument(name = "assistant.load_document", skip_all, fields(session_id = %session_id, bytes = bytes.len()))]
    pub async fn load_document(
        &self,
        session_id: &str,
        name: &str,
        format: DocumentFormat,
        bytes: Vec<u8>,
    ) -> Result<LoadOutcome> {
        let name = match name.trim() {
            "" => "document".to_string(),
            trimmed => trimmed.to_string(),
        };

        let text = tokio::task::spawn_blocking(move || extract_text(format, &bytes))
            .await
            .map_err(|err| HelperError::Document(format!("extraction task failed: {err}")))??;
        if text.trim().is_empty() {
            info!(%name, "document has no text; index unchanged");
            return Ok(LoadOutcome::NoContent { name });
        }
        let chunks = self.settings.splitter.split(&text);
        if chunks.is_empty() {
            info!(%name, "document has no text; index unchanged");
            return Ok(LoadOutcome::NoContent { name });
        }

        let count = chunks.len();
        self.collaborators
            .retriever
            .replace(session_id, IngestDocument::from_chunks(&name, chunks))
            .await?;
        self.presenter(session_id, PipelineKind::DocumentQa)
            .set_material(WorkingMaterial::IndexedDocument {
                name: name.clone(),
                chunks: count,
            });
        info!(%name, chunks = count, "document indexed");
        Ok(LoadOutcome::Indexed {
            name,
            chunks: count,
        })
    }

    /// Answer `question` from the session's indexed document.
    #[instrument(name = "assistant.ask", skip_all, fields(session_id = %session_id))]
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<String> {
        let question = required(question, "question")?;
        let presenter = self.presenter(session_id, PipelineKind::DocumentQa);
        if !matches!(
            presenter.material(),
            Some(WorkingMaterial::IndexedDocument { .. })
        ) {
            return Err(HelperError::NoDocumentLoaded);
        }

        let documents = self
            .collaborators
            .retriever
            .retrieve(session_id, question, self.settings.top_k)
            .await?;
        let context = documents
            .iter()
            .map(|doc| doc.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = templates::document_answer().render(&inputs([
            ("context", context.as_str()),
            ("question", question),
        ]))?;
        let answer = self
            .collaborators
            .model
            .chat(ChatRequest::new(messages).with_temperature(self.settings.answer_temperature))
            .await?
            .content;

        self.finish(
            session_id,
            PipelineKind::DocumentQa,
            question,
            &answer,
            vec![format!("retrieve x{}", documents.len()), "answer".into()],
        );
        Ok(answer)
    }

    /// Mail the current result of `pipeline` to `recipient`.
    #[instrument(name = "assistant.email", skip_all, fields(session_id = %session_id, pipeline = %pipeline))]
    pub async fn email_result(
        &self,
        session_id: &str,
        pipeline: PipelineKind,
        recipient: &str,
    ) -> Result<()> {
        let recipient = required(recipient, "recipient")?;
        let body = self
            .presenter(session_id, pipeline)
            .result()
            .ok_or(HelperError::NothingToSend)?;

        self.collaborators
            .mailer
            .send(OutgoingMail {
                to: recipient.to_string(),
                subject: pipeline.email_subject().to_string(),
                body,
            })
            .await
    }

    /// Reset one pipeline slot. For document QA the session's index goes too.
    #[instrument(name = "assistant.clear", skip_all, fields(session_id = %session_id, pipeline = %pipeline))]
    pub async fn clear(&self, session_id: &str, pipeline: PipelineKind) -> Result<()> {
        if pipeline == PipelineKind::DocumentQa {
            self.collaborators.retriever.clear(session_id).await?;
        }
        self.presenter(session_id, pipeline).clear();
        Ok(())
    }

    /// Forget everything held for a session, including its run-log lines.
    #[instrument(name = "assistant.end_session", skip_all, fields(session_id = %session_id))]
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        self.collaborators.retriever.clear(session_id).await?;
        let removed = self.sessions.drop_session(session_id);
        if let Some(run_log) = &self.run_log {
            run_log.remove_session(session_id)?;
        }
        info!(slots = removed, "session ended");
        Ok(())
    }

    /// End every session idle for longer than the configured TTL. Returns the
    /// expired session ids.
    #[instrument(name = "assistant.expire_idle_sessions", skip_all)]
    pub async fn expire_idle_sessions(&self) -> Result<Vec<String>> {
        let Some(ttl) = self.settings.session_idle_ttl else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired = self.sessions.idle_since(cutoff);
        for session_id in &expired {
            self.end_session(session_id).await?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired idle sessions");
        }
        Ok(expired)
    }

    fn finish(
        &self,
        session_id: &str,
        pipeline: PipelineKind,
        topic: &str,
        result: &str,
        stages: Vec<String>,
    ) {
        self.presenter(session_id, pipeline).set(topic, result);

        if let Some(run_log) = &self.run_log {
            let entry = RunLogEntry {
                session_id: session_id.to_string(),
                pipeline,
                topic: topic.to_string(),
                result: result.to_string(),
                stages,
            };
            if let Err(err) = run_log.record(&entry) {
                warn!(error = %err, "failed to append run log");
            }
        }
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HelperError::missing_input(field));
    }
    Ok(trimmed)
}

fn stages_of(outcome: &WorkflowOutcome) -> Vec<String> {
    outcome
        .trace
        .iter()
        .map(|event| event.stage.clone())
        .collect()
}

#[cfg(feature = "qdrant-retriever")]
async fn build_retriever(config: &Config, embedder: DynEmbedder) -> Result<DynRetriever> {
    use crate::memory::{QdrantConfig, QdrantRetriever};

    match &config.documents.qdrant_url {
        Some(url) => {
            let retriever = QdrantRetriever::new(QdrantConfig {
                url: url.clone(),
                collection: config.documents.qdrant_collection.clone(),
                concurrency_limit: 4,
            })
            .await?;
            Ok(Arc::new(retriever))
        }
        None => Ok(Arc::new(
            LocalRetriever::new(embedder).with_persist_dir(&config.documents.persist_dir),
        )),
    }
}

#[cfg(not(feature = "qdrant-retriever"))]
async fn build_retriever(config: &Config, embedder: DynEmbedder) -> Result<DynRetriever> {
    if config.documents.qdrant_url.is_some() {
        return Err(HelperError::InvalidConfiguration(
            "documents.qdrant_url requires the `qdrant-retriever` feature".into(),
        ));
    }
    Ok(Arc::new(
        LocalRetriever::new(embedder).with_persist_dir(&config.documents.persist_dir),
    ))
}

/// Stands in for a collaborator whose credentials are not configured.
struct Unavailable {
    var: String,
}

impl Unavailable {
    fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for Unavailable {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
        Err(HelperError::MissingSecret(self.var.clone()))
    }
}

#[async_trait]
impl Mailer for Unavailable {
    async fn send(&self, _mail: OutgoingMail) -> Result<()> {
        Err(HelperError::MissingSecret(self.var.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ScriptedModel};
    use crate::mail::MemoryMailer;
    use crate::scrape::StaticFetcher;
    use crate::search::StaticSearch;

    fn assistant(model: ScriptedModel, fetcher: StaticFetcher) -> (Assistant, Arc<MemoryMailer>) {
        let mailer = Arc::new(MemoryMailer::new());
        let collaborators = Collaborators {
            model: Arc::new(model),
            retriever: Arc::new(LocalRetriever::new(Arc::new(HashEmbedder::new(64)))),
            search: Arc::new(StaticSearch::new(Vec::new())),
            fetcher: Arc::new(fetcher),
            mailer: mailer.clone(),
        };
        (
            Assistant::new(collaborators, AssistantSettings::default()),
            mailer,
        )
    }

    #[tokio::test]
    async fn extract_requires_a_scraped_page() {
        let (assistant, _) = assistant(ScriptedModel::fixed("x"), StaticFetcher::new());
        let err = assistant.extract("s1", "prices").await.unwrap_err();
        assert!(matches!(err, HelperError::NothingScraped));
    }

    #[tokio::test]
    async fn extract_skips_empty_chunk_answers() {
        let html = "<html><body><p>Widget costs 5 EUR</p></body></html>";
        let fetcher = StaticFetcher::new().with_page("https://shop.test", html);
        let model = ScriptedModel::new(|request| {
            let prompt = request.last_user_message().unwrap_or_default();
            if prompt.contains("Widget") {
                Ok(ChatResponse::text("5 EUR"))
            } else {
                Ok(ChatResponse::text(""))
            }
        });
        let (assistant, _) = assistant(model, fetcher);

        let text = assistant.scrape("s1", " https://shop.test ").await.unwrap();
        assert_eq!(text, "Widget costs 5 EUR");

        let answer = assistant.extract("s1", "prices").await.unwrap();
        assert_eq!(answer, "5 EUR");
        assert_eq!(
            assistant.presenter("s1", PipelineKind::WebScraper).get(),
            ("prices".to_string(), Some("5 EUR".to_string()))
        );
    }

    #[tokio::test]
    async fn ask_without_document_fails() {
        let (assistant, _) = assistant(ScriptedModel::fixed("x"), StaticFetcher::new());
        let err = assistant.ask("s1", "what?").await.unwrap_err();
        assert!(matches!(err, HelperError::NoDocumentLoaded));
    }

    #[tokio::test]
    async fn email_needs_a_result_and_recipient() {
        let (assistant, mailer) = assistant(ScriptedModel::fixed("x"), StaticFetcher::new());

        let err = assistant
            .email_result("s1", PipelineKind::Essay, "me@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::NothingToSend));

        assistant
            .presenter("s1", PipelineKind::Essay)
            .set("topic", "essay text");
        let err = assistant
            .email_result("s1", PipelineKind::Essay, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::MissingInput(field) if field == "recipient"));

        assistant
            .email_result("s1", PipelineKind::Essay, "me@example.com")
            .await
            .unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Essay");
        assert_eq!(sent[0].body, "essay text");
    }

    #[tokio::test]
    async fn idle_sessions_expire_with_their_index() {
        let (mut assistant, _) = assistant(ScriptedModel::fixed("x"), StaticFetcher::new());
        assert!(assistant.expire_idle_sessions().await.unwrap().is_empty());

        assistant.settings.session_idle_ttl = Some(TimeDelta::zero());
        assistant
            .load_document("s1", "notes.txt", DocumentFormat::PlainText, b"Hydro".to_vec())
            .await
            .unwrap();
        assistant.presenter("s1", PipelineKind::Essay).set("t", "essay");

        let expired = assistant.expire_idle_sessions().await.unwrap();
        assert_eq!(expired, vec!["s1".to_string()]);
        assert_eq!(assistant.sessions().session_count(), 0);
        assert!(matches!(
            assistant.ask("s1", "what?").await.unwrap_err(),
            HelperError::NoDocumentLoaded
        ));
    }

    #[tokio::test]
    async fn recent_sessions_survive_expiry() {
        let (mut assistant, _) = assistant(ScriptedModel::fixed("x"), StaticFetcher::new());
        assistant.settings.session_idle_ttl = TimeDelta::try_hours(1);
        assistant.presenter("s1", PipelineKind::Essay).set("t", "essay");

        assert!(assistant.expire_idle_sessions().await.unwrap().is_empty());
        assert!(assistant.result("s1", PipelineKind::Essay).is_some());
    }

    #[tokio::test]
    async fn unavailable_collaborator_names_the_missing_variable() {
        let search = Unavailable::new("TAVILY_API_KEY");
        let err = search.search("q", 3).await.unwrap_err();
        assert!(matches!(err, HelperError::MissingSecret(var) if var == "TAVILY_API_KEY"));
    }
}
