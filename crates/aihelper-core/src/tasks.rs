use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use tracing::{debug, info, instrument};

use crate::agent::Agent;
use crate::llm::ChatMessage;
use crate::prompt::{PromptInputs, PromptedTool};
use crate::search::{SearchProvider, render_results};
use crate::trace::TraceEvent;

pub const TRACE_KEY: &str = "trace.events";

pub mod keys {
    pub const TOPIC: &str = "topic";
    pub const RAW_RESULTS: &str = "research.raw_results";
    pub const SEARCH: &str = "research.search";
    pub const SYNTHESIS: &str = "research.synthesis";
    pub const CITATIONS: &str = "research.citations";
    pub const FACTS: &str = "research.facts";
    pub const BIAS: &str = "research.bias";
    pub const SUPERVISOR: &str = "research.supervisor";

    pub const ESSAY_DRAFT: &str = "essay.draft";
    pub const ESSAY_REVIEW: &str = "essay.review";
    pub const ESSAY_IMPROVED: &str = "essay.improved";
    pub const ESSAY_KEYWORDS: &str = "essay.keywords";
    pub const ESSAY_FINAL: &str = "essay.final";
}

fn next_action(terminal: bool) -> NextAction {
    if terminal {
        NextAction::End
    } else {
        NextAction::ContinueAndExecute
    }
}

fn task_failed(stage: &str, error: impl std::fmt::Display) -> GraphError {
    GraphError::TaskExecutionFailed(format!("stage `{stage}` failed: {error}"))
}

async fn record_trace(context: &Context, stage: &str, message: String) {
    let mut events: Vec<TraceEvent> = context.get(TRACE_KEY).await.unwrap_or_default();
    events.push(TraceEvent::new(stage, message));
    context.set(TRACE_KEY, events).await;
}

async fn require_text(context: &Context, stage: &str, key: &str) -> graph_flow::Result<String> {
    context.get::<String>(key).await.ok_or_else(|| {
        GraphError::TaskExecutionFailed(format!(
            "stage `{stage}` is missing input `{key}`; its predecessor did not run"
        ))
    })
}

/// Where a template placeholder gets its value from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Context(&'static str),
    Literal(String),
}

/// Runs the programmatic web search for the topic, then lets the search agent
/// (which may search again) condense the results.
pub struct SearchTask {
    provider: Arc<dyn SearchProvider>,
    tool: Arc<PromptedTool>,
    max_results: usize,
}

impl SearchTask {
    pub const ID: &'static str = "search";

    pub fn new(
        provider: Arc<dyn SearchProvider>,
        tool: Arc<PromptedTool>,
        max_results: usize,
    ) -> Self {
        Self {
            provider,
            tool,
            max_results,
        }
    }
}

#[async_trait]
impl Task for SearchTask {
    fn id(&self) -> &str {
        Self::ID
    }

    #[instrument(name = "task.search", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let topic = require_text(&context, Self::ID, keys::TOPIC).await?;

        let results = self
            .provider
            .search(&topic, self.max_results)
            .await
            .map_err(|err| task_failed(Self::ID, err))?;
        let rendered = render_results(&results);
        info!(%topic, results = results.len(), "initial web search completed");

        let named: PromptInputs = [
            ("topic".to_string(), topic),
            ("results".to_string(), rendered.clone()),
        ]
        .into_iter()
        .collect();
        let output = self
            .tool
            .invoke(&named)
            .await
            .map_err(|err| task_failed(Self::ID, err))?;

        context.set(keys::RAW_RESULTS, rendered).await;
        context.set(keys::SEARCH, output.clone()).await;
        record_trace(
            &context,
            Self::ID,
            format!("{} sources, {} chars", results.len(), output.len()),
        )
        .await;

        Ok(TaskResult::new(
            Some(output),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// A workflow stage that fills a prompted tool from context values and
/// stores the answer under its output key.
pub struct PromptStageTask {
    id: String,
    tool: Arc<PromptedTool>,
    bindings: Vec<(String, InputSource)>,
    output_key: &'static str,
    terminal: bool,
}

impl PromptStageTask {
    pub fn new(id: impl Into<String>, tool: Arc<PromptedTool>, output_key: &'static str) -> Self {
        Self {
            id: id.into(),
            tool,
            bindings: Vec::new(),
            output_key,
            terminal: false,
        }
    }

    pub fn bind(mut self, placeholder: impl Into<String>, source: InputSource) -> Self {
        self.bindings.push((placeholder.into(), source));
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn output_key(&self) -> &'static str {
        self.output_key
    }
}

#[async_trait]
impl Task for PromptStageTask {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(name = "task.prompt_stage", skip(self, context), fields(stage = %self.id))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let mut named = PromptInputs::new();
        for (placeholder, source) in &self.bindings {
            let value = match source {
                InputSource::Context(key) => require_text(&context, &self.id, key).await?,
                InputSource::Literal(text) => text.clone(),
            };
            named.insert(placeholder.clone(), value);
        }

        let output = self
            .tool
            .invoke(&named)
            .await
            .map_err(|err| task_failed(&self.id, err))?;
        debug!(chars = output.len(), key = self.output_key, "stage produced output");

        context.set(self.output_key, output.clone()).await;
        record_trace(&context, &self.id, format!("{} chars", output.len())).await;

        Ok(TaskResult::new(Some(output), next_action(self.terminal)))
    }
}

/// Joins the improved essay and its keywords without a model call.
pub struct CombineTask;

impl CombineTask {
    pub const ID: &'static str = "combine";
}

pub fn combine_text(text: &str, keywords: &str) -> String {
    format!("{text}\n\n{keywords}")
}

#[async_trait]
impl Task for CombineTask {
    fn id(&self) -> &str {
        Self::ID
    }

    #[instrument(name = "task.combine", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let text = require_text(&context, Self::ID, keys::ESSAY_IMPROVED).await?;
        let keywords = require_text(&context, Self::ID, keys::ESSAY_KEYWORDS).await?;

        let combined = combine_text(&text, &keywords);
        context.set(keys::ESSAY_FINAL, combined.clone()).await;
        record_trace(&context, Self::ID, format!("{} chars", combined.len())).await;

        Ok(TaskResult::new(Some(combined), NextAction::End))
    }
}

/// Single-step research run where the supervisor agent picks the stages.
pub struct SupervisorTask {
    agent: Arc<dyn Agent>,
    instruction: String,
}

impl SupervisorTask {
    pub const ID: &'static str = "supervisor";

    pub fn new(agent: Arc<dyn Agent>, instruction: impl Into<String>) -> Self {
        Self {
            agent,
            instruction: instruction.into(),
        }
    }
}

#[async_trait]
impl Task for SupervisorTask {
    fn id(&self) -> &str {
        Self::ID
    }

    #[instrument(name = "task.supervisor", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let topic = require_text(&context, Self::ID, keys::TOPIC).await?;
        let output = self
            .agent
            .invoke(vec![
                ChatMessage::system(self.instruction.clone()),
                ChatMessage::user(topic),
            ])
            .await
            .map_err(|err| task_failed(Self::ID, err))?;

        context.set(keys::SUPERVISOR, output.clone()).await;
        record_trace(&context, Self::ID, format!("{} chars", output.len())).await;

        Ok(TaskResult::new(Some(output), NextAction::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_separates_with_blank_line() {
        assert_eq!(combine_text("essay", "keywords"), "essay\n\nkeywords");
    }

    #[tokio::test]
    async fn combine_requires_both_inputs() {
        let context = Context::new();
        context.set(keys::ESSAY_IMPROVED, "essay".to_string()).await;

        let err = CombineTask.run(context).await.err().expect("missing keywords");
        assert!(err.to_string().contains(keys::ESSAY_KEYWORDS));
    }

    #[tokio::test]
    async fn combine_stores_final_text_and_trace() {
        let context = Context::new();
        context.set(keys::ESSAY_IMPROVED, "essay".to_string()).await;
        context.set(keys::ESSAY_KEYWORDS, "- solar".to_string()).await;

        CombineTask.run(context.clone()).await.unwrap();

        let final_text: Option<String> = context.get(keys::ESSAY_FINAL).await;
        assert_eq!(final_text.as_deref(), Some("essay\n\n- solar"));
        let events: Vec<TraceEvent> = context.get(TRACE_KEY).await.unwrap_or_default();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, "combine");
    }
}
