//! Research and essay pipelines expressed as explicit `graph_flow` graphs.

use std::sync::Arc;

use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::HelperError;
use crate::agent::{CurrentDateTool, DynTool, RoleAgent, WebSearchTool};
use crate::config::{OrchestrationMode, ResearchConfig};
use crate::llm::DynChatModel;
use crate::prompt::{PromptTemplate, PromptedTool};
use crate::search::SearchProvider;
use crate::tasks::{
    CombineTask, InputSource, PromptStageTask, SearchTask, SupervisorTask, TRACE_KEY, keys,
};
use crate::templates;
use crate::trace::{TraceEvent, TraceSummary};

/// Result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Terminal output of the last stage.
    pub output: String,
    /// `(context key, text)` of every stage that ran, in order.
    pub stage_outputs: Vec<(String, String)>,
    pub trace: Vec<TraceEvent>,
}

impl WorkflowOutcome {
    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }

    pub fn stage(&self, key: &str) -> Option<&str> {
        self.stage_outputs
            .iter()
            .find(|(stage_key, _)| stage_key == key)
            .map(|(_, text)| text.as_str())
    }
}

/// Run a graph to completion in a fresh in-memory session and collect the
/// requested context keys.
async fn execute_graph(
    graph: Arc<Graph>,
    start_task: &str,
    topic: &str,
    output_key: &str,
    stage_keys: &[&str],
) -> Result<WorkflowOutcome, HelperError> {
    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());

    let session_id = format!("run-{}", Uuid::new_v4());
    let session = Session::new_from_task(session_id.clone(), start_task);
    session.context.set(keys::TOPIC, topic.to_string()).await;

    storage
        .save(session)
        .await
        .map_err(|err| HelperError::Workflow(format!("failed to persist session: {err}")))?;

    loop {
        let result = runner
            .run(&session_id)
            .await
            .map_err(|err| HelperError::Workflow(err.to_string()))?;

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::WaitingForInput => {
                return Err(HelperError::Workflow(
                    "workflow paused waiting for input".into(),
                ));
            }
            ExecutionStatus::Error(message) => return Err(HelperError::Workflow(message)),
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| HelperError::Workflow(format!("failed to reload session: {err}")))?
        .ok_or_else(|| HelperError::Workflow("session missing after execution".into()))?;

    let output: String = session.context.get(output_key).await.ok_or_else(|| {
        HelperError::Workflow(format!("terminal output `{output_key}` was not produced"))
    })?;

    let mut stage_outputs = Vec::new();
    for key in stage_keys {
        if let Some(text) = session.context.get::<String>(key).await {
            stage_outputs.push((key.to_string(), text));
        }
    }
    let trace: Vec<TraceEvent> = session.context.get(TRACE_KEY).await.unwrap_or_default();

    Ok(WorkflowOutcome {
        output,
        stage_outputs,
        trace,
    })
}

fn require_topic(topic: &str) -> Result<&str, HelperError> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        return Err(HelperError::missing_input("topic"));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub mode: OrchestrationMode,
    pub citation_style: String,
    pub max_results: usize,
    pub max_agent_steps: usize,
    pub temperature: Option<f32>,
}

impl ResearchSettings {
    pub fn from_config(research: &ResearchConfig, max_results: usize) -> Self {
        Self {
            mode: research.mode,
            citation_style: research.citation_style.clone(),
            max_results,
            max_agent_steps: research.max_agent_steps,
            temperature: research.temperature,
        }
    }
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self::from_config(&ResearchConfig::default(), 5)
    }
}

/// The five role agents of the research pipeline wrapped as prompted tools.
struct ResearchTools {
    search: Arc<PromptedTool>,
    search_query: Arc<PromptedTool>,
    synthesize: Arc<PromptedTool>,
    cite: Arc<PromptedTool>,
    fact_check: Arc<PromptedTool>,
    bias_check: Arc<PromptedTool>,
}

pub struct ResearchPipeline {
    model: DynChatModel,
    search: Arc<dyn SearchProvider>,
    settings: ResearchSettings,
}

impl ResearchPipeline {
    pub const STAGE_KEYS: [&'static str; 5] = [
        keys::SEARCH,
        keys::SYNTHESIS,
        keys::CITATIONS,
        keys::FACTS,
        keys::BIAS,
    ];

    pub fn new(
        model: DynChatModel,
        search: Arc<dyn SearchProvider>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            model,
            search,
            settings,
        }
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    fn agent(&self, name: &str, tools: Vec<DynTool>) -> Arc<RoleAgent> {
        Arc::new(
            RoleAgent::new(name, self.model.clone())
                .with_tools(tools)
                .with_max_steps(self.settings.max_agent_steps)
                .with_temperature(self.settings.temperature),
        )
    }

    fn tools(&self) -> ResearchTools {
        let web_search: DynTool = Arc::new(WebSearchTool::new(
            self.search.clone(),
            self.settings.max_results,
        ));
        let date: DynTool = Arc::new(CurrentDateTool);

        let search_agent = self.agent("search_agent", vec![date, web_search.clone()]);
        let synthesizer = self.agent("synthesizer_agent", Vec::new());
        let citation = self.agent("citation_agent", vec![web_search.clone()]);
        let fact_checker = self.agent("fact_checker_agent", vec![web_search.clone()]);
        let bias_detector = self.agent("bias_detection_agent", vec![web_search]);

        ResearchTools {
            search: Arc::new(PromptedTool::new(
                "search_tool",
                "Uses the Search Agent to gather information",
                templates::research_search(),
                search_agent.clone(),
            )),
            search_query: Arc::new(PromptedTool::new(
                "search_tool",
                "Uses the Search Agent to gather information",
                templates::research_search_query(),
                search_agent,
            )),
            synthesize: Arc::new(PromptedTool::new(
                "synthesizer_tool",
                "Synthesizes research results into a comprehensive, logically organised \
                 narrative addressing the user's query",
                templates::research_synthesize(),
                synthesizer,
            )),
            cite: Arc::new(PromptedTool::new(
                "citation_tool",
                "Formats sources into citations of the requested style (APA, MLA, Chicago) and \
                 validates their credibility",
                templates::research_cite(),
                citation,
            )
            .with_default("style", self.settings.citation_style.clone())),
            fact_check: Arc::new(PromptedTool::new(
                "fact_checker_tool",
                "Cross-references key claims against multiple sources and returns confidence \
                 scores and conflicting information",
                templates::research_fact_check(),
                fact_checker,
            )),
            bias_check: Arc::new(PromptedTool::new(
                "bias_analyzer_tool",
                "Analyzes content for loaded language, one-sided perspectives, missing \
                 counterarguments and conflicts of interest",
                templates::research_bias_check(),
                bias_detector,
            )),
        }
    }

    fn sequential_graph(&self) -> Arc<Graph> {
        let tools = self.tools();
        let style = self.settings.citation_style.clone();

        let search = Arc::new(SearchTask::new(
            self.search.clone(),
            tools.search,
            self.settings.max_results,
        ));
        let synthesize = Arc::new(
            PromptStageTask::new("synthesize", tools.synthesize, keys::SYNTHESIS)
                .bind("search_results", InputSource::Context(keys::SEARCH))
                .bind("user_query", InputSource::Context(keys::TOPIC)),
        );
        let cite = Arc::new(
            PromptStageTask::new("cite", tools.cite, keys::CITATIONS)
                .bind("content", InputSource::Context(keys::SYNTHESIS))
                .bind("sources", InputSource::Context(keys::RAW_RESULTS))
                .bind("style", InputSource::Literal(style)),
        );
        let fact_check = Arc::new(
            PromptStageTask::new("fact_check", tools.fact_check, keys::FACTS)
                .bind("claims", InputSource::Context(keys::CITATIONS))
                .bind("sources", InputSource::Context(keys::RAW_RESULTS)),
        );
        let bias_check = Arc::new(
            PromptStageTask::new("bias_check", tools.bias_check, keys::BIAS)
                .bind("content", InputSource::Context(keys::FACTS))
                .terminal(),
        );

        let graph = GraphBuilder::new("research_workflow")
            .add_task(search.clone())
            .add_task(synthesize.clone())
            .add_task(cite.clone())
            .add_task(fact_check.clone())
            .add_task(bias_check.clone())
            .add_edge(search.id(), synthesize.id())
            .add_edge(synthesize.id(), cite.id())
            .add_edge(cite.id(), fact_check.id())
            .add_edge(fact_check.id(), bias_check.id())
            .set_start_task(search.id())
            .build();

        Arc::new(graph)
    }

    fn delegated_graph(&self) -> Arc<Graph> {
        let tools = self.tools();
        let stage_tools: Vec<DynTool> = vec![
            tools.search_query as DynTool,
            tools.synthesize as DynTool,
            tools.cite as DynTool,
            tools.fact_check as DynTool,
            tools.bias_check as DynTool,
        ];
        // The supervisor needs room for five tool rounds plus its final answer.
        let supervisor = Arc::new(
            RoleAgent::new("supervisor", self.model.clone())
                .with_tools(stage_tools)
                .with_max_steps(self.settings.max_agent_steps.max(6))
                .with_temperature(self.settings.temperature),
        );
        let task = Arc::new(SupervisorTask::new(
            supervisor,
            templates::SUPERVISOR_INSTRUCTION,
        ));

        let graph = GraphBuilder::new("research_supervisor")
            .add_task(task.clone())
            .set_start_task(task.id())
            .build();

        Arc::new(graph)
    }

    /// Research `topic` and return the terminal output with every stage's text.
    #[instrument(name = "workflow.research", skip(self), fields(mode = ?self.settings.mode))]
    pub async fn run(&self, topic: &str) -> Result<WorkflowOutcome, HelperError> {
        let topic = require_topic(topic)?;

        let outcome = match self.settings.mode {
            OrchestrationMode::Sequential => {
                execute_graph(
                    self.sequential_graph(),
                    SearchTask::ID,
                    topic,
                    keys::BIAS,
                    &Self::STAGE_KEYS,
                )
                .await?
            }
            OrchestrationMode::Delegated => {
                execute_graph(
                    self.delegated_graph(),
                    SupervisorTask::ID,
                    topic,
                    keys::SUPERVISOR,
                    &[keys::SUPERVISOR],
                )
                .await?
            }
        };

        info!(stages = outcome.trace.len(), "research workflow completed");
        Ok(outcome)
    }
}

pub struct EssayPipeline {
    model: DynChatModel,
    temperature: Option<f32>,
}

impl EssayPipeline {
    pub const STAGE_KEYS: [&'static str; 5] = [
        keys::ESSAY_DRAFT,
        keys::ESSAY_REVIEW,
        keys::ESSAY_IMPROVED,
        keys::ESSAY_KEYWORDS,
        keys::ESSAY_FINAL,
    ];

    pub fn new(model: DynChatModel) -> Self {
        Self {
            model,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn tool(&self, name: &str, description: &str, template: PromptTemplate) -> Arc<PromptedTool> {
        let agent = Arc::new(
            RoleAgent::new(name, self.model.clone()).with_temperature(self.temperature),
        );
        Arc::new(PromptedTool::new(name, description, template, agent))
    }

    fn graph(&self) -> Arc<Graph> {
        let generate = Arc::new(
            PromptStageTask::new(
                "generate",
                self.tool(
                    "generate",
                    "Generates text for project based on users input.",
                    templates::essay_generate(),
                ),
                keys::ESSAY_DRAFT,
            )
            .bind("topic", InputSource::Context(keys::TOPIC)),
        );
        let review = Arc::new(
            PromptStageTask::new(
                "review",
                self.tool(
                    "review",
                    "Writes the review of the text and tells what to improve.",
                    templates::essay_review(),
                ),
                keys::ESSAY_REVIEW,
            )
            .bind("text", InputSource::Context(keys::ESSAY_DRAFT)),
        );
        let improve = Arc::new(
            PromptStageTask::new(
                "improve",
                self.tool(
                    "improve_text",
                    "Edits the text of the project based on the review of the text.",
                    templates::essay_improve(),
                ),
                keys::ESSAY_IMPROVED,
            )
            .bind("text", InputSource::Context(keys::ESSAY_DRAFT))
            .bind("review", InputSource::Context(keys::ESSAY_REVIEW)),
        );
        let keywords = Arc::new(
            PromptStageTask::new(
                "keywords",
                self.tool(
                    "get_keywords",
                    "Creates keywords or phrases for powerpoint presentation based on text.",
                    templates::essay_keywords(),
                ),
                keys::ESSAY_KEYWORDS,
            )
            .bind("text", InputSource::Context(keys::ESSAY_IMPROVED)),
        );
        let combine = Arc::new(CombineTask);

        let graph = GraphBuilder::new("essay_workflow")
            .add_task(generate.clone())
            .add_task(review.clone())
            .add_task(improve.clone())
            .add_task(keywords.clone())
            .add_task(combine.clone())
            .add_edge(generate.id(), review.id())
            .add_edge(review.id(), improve.id())
            .add_edge(improve.id(), keywords.id())
            .add_edge(keywords.id(), combine.id())
            .set_start_task(generate.id())
            .build();

        Arc::new(graph)
    }

    /// Generate, review, improve, extract keywords, combine.
    #[instrument(name = "workflow.essay", skip(self))]
    pub async fn run(&self, topic: &str) -> Result<WorkflowOutcome, HelperError> {
        let topic = require_topic(topic)?;
        let outcome = execute_graph(
            self.graph(),
            "generate",
            topic,
            keys::ESSAY_FINAL,
            &Self::STAGE_KEYS,
        )
        .await?;
        info!(chars = outcome.output.len(), "essay workflow completed");
        Ok(outcome)
    }
}
