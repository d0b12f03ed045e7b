//! Role agents and the tools they may call.
//!
//! A [`RoleAgent`] bundles a model handle with a restricted tool set. Which
//! tool to call, how often, and when to stop is decided by the hosted model;
//! the agent only executes the requested calls and feeds the results back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::HelperError;
use crate::llm::{ChatMessage, ChatRequest, DynChatModel, ToolCall, ToolSpec};
use crate::search::{SearchProvider, render_results};

pub const DEFAULT_AGENT_MAX_STEPS: usize = 8;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Run the conversation to a final text answer.
    async fn invoke(&self, conversation: Vec<ChatMessage>) -> Result<String, HelperError>;
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, arguments: Value) -> Result<String, HelperError>;
}

pub type DynTool = Arc<dyn Tool>;

pub struct RoleAgent {
    name: String,
    model: DynChatModel,
    tools: Vec<DynTool>,
    max_steps: usize,
    temperature: Option<f32>,
}

impl RoleAgent {
    pub fn new(name: impl Into<String>, model: DynChatModel) -> Self {
        Self {
            name: name.into(),
            model,
            tools: Vec::new(),
            max_steps: DEFAULT_AGENT_MAX_STEPS,
            temperature: None,
        }
    }

    pub fn with_tool(mut self, tool: DynTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = DynTool>,
    {
        self.tools.extend(tools);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.spec().name).collect()
    }

    async fn execute_call(&self, call: &ToolCall) -> Result<String, HelperError> {
        let Some(tool) = self.tools.iter().find(|tool| tool.spec().name == call.name) else {
            warn!(agent = %self.name, tool = %call.name, "model requested unknown tool");
            return Ok(format!(
                "Unknown tool `{}`. Available tools: {}",
                call.name,
                self.tool_names().join(", ")
            ));
        };

        debug!(agent = %self.name, tool = %call.name, "executing tool call");
        tool.call(call.arguments.clone()).await
    }
}

#[async_trait]
impl Agent for RoleAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "agent.invoke", skip(self, conversation), fields(agent = %self.name))]
    async fn invoke(&self, mut conversation: Vec<ChatMessage>) -> Result<String, HelperError> {
        let specs: Vec<ToolSpec> = self.tools.iter().map(|tool| tool.spec()).collect();

        for step in 0..self.max_steps {
            let request = ChatRequest::new(conversation.clone())
                .with_tools(specs.clone())
                .with_temperature(self.temperature);
            let response = self.model.chat(request).await?;

            if response.tool_calls.is_empty() {
                info!(step, chars = response.content.len(), "agent produced final answer");
                return Ok(response.content);
            }

            conversation.push(ChatMessage::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let output = match self.execute_call(call).await {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(
                            agent = %self.name,
                            tool = %call.name,
                            error = %err,
                            "tool call failed"
                        );
                        format!("Tool `{}` failed: {err}", call.name)
                    }
                };
                conversation.push(ChatMessage::tool_result(call.id.clone(), output));
            }
        }

        Err(HelperError::agent(
            &self.name,
            format!("no final answer after {} steps", self.max_steps),
        ))
    }
}

/// Returns the current local date and time, for queries about recent events.
pub struct CurrentDateTool;

#[async_trait]
impl Tool for CurrentDateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "date".into(),
            description: "Return current date and time in the system's local timezone, \
                          required for current data search"
                .into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<String, HelperError> {
        Ok(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

/// Web search exposed as a tool. Search failures are reported to the model as
/// text so it can retry with a different query.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, default_max_results: usize) -> Self {
        Self {
            provider,
            default_max_results: default_max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search".into(),
            description: "Searches the web for results. Requires query and number of maximum \
                          results that should be set by relevance"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, HelperError> {
        let query = match &arguments {
            Value::String(query) => query.clone(),
            other => other
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        if query.trim().is_empty() {
            return Ok("Web search failed: no query provided. Please try a different query.".into());
        }

        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|value| value as usize)
            .filter(|value| *value > 0)
            .unwrap_or(self.default_max_results);

        match self.provider.search(&query, max_results).await {
            Ok(results) => Ok(render_results(&results)),
            Err(HelperError::Search(reason)) => Ok(format!(
                "Web search failed: {reason}. Please try a different query."
            )),
            Err(err) => Ok(format!(
                "Web search failed: {err}. Please try a different query."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, Role, ScriptedModel};
    use crate::search::{SearchResult, StaticSearch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn search_tool() -> DynTool {
        Arc::new(WebSearchTool::new(
            Arc::new(StaticSearch::new(vec![SearchResult::new(
                "Grid report",
                "https://grid.example",
                "Storage doubled",
            )])),
            3,
        ))
    }

    #[tokio::test]
    async fn agent_without_tool_calls_returns_text() {
        let model = Arc::new(ScriptedModel::fixed("final"));
        let agent = RoleAgent::new("synthesizer", model.clone());
        let output = agent.invoke(vec![ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(output, "final");
        assert_eq!(model.call_count(), 1);
        assert!(model.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn agent_executes_requested_tools_and_feeds_results_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let model = Arc::new(ScriptedModel::new(move |request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(ChatResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".into(),
                        name: "search".into(),
                        arguments: json!({"query": "grid storage", "max_results": 1}),
                    }],
                });
            }
            let tool_output = request
                .messages
                .iter()
                .find(|message| message.role == Role::Tool)
                .map(|message| message.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse::text(format!("summary of: {tool_output}")))
        }));

        let agent = RoleAgent::new("search_agent", model.clone()).with_tool(search_tool());
        let output = agent.invoke(vec![ChatMessage::user("grid")]).await.unwrap();

        assert!(output.contains("Title: Grid report"));
        assert_eq!(model.call_count(), 2);
        assert_eq!(model.requests()[0].tools[0].name, "search");
    }

    #[tokio::test]
    async fn unknown_tools_are_reported_to_the_model() {
        let model = Arc::new(ScriptedModel::new(|request| {
            match request.messages.iter().find(|m| m.role == Role::Tool) {
                Some(tool_message) => Ok(ChatResponse::text(tool_message.content.clone())),
                None => Ok(ChatResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "c".into(),
                        name: "teleport".into(),
                        arguments: json!({}),
                    }],
                }),
            }
        }));

        let agent = RoleAgent::new("bias", model).with_tool(search_tool());
        let output = agent.invoke(vec![ChatMessage::user("x")]).await.unwrap();
        assert!(output.starts_with("Unknown tool `teleport`"));
    }

    #[tokio::test]
    async fn tool_errors_are_reported_to_the_model() {
        struct Rejecting;
        #[async_trait]
        impl Tool for Rejecting {
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: "cite".into(),
                    description: "Formats citations".into(),
                    parameters: json!({ "type": "object", "properties": {} }),
                }
            }

            async fn call(&self, _arguments: Value) -> Result<String, HelperError> {
                Err(HelperError::MissingInput("content".into()))
            }
        }

        let model = Arc::new(ScriptedModel::new(|request| {
            match request.messages.iter().find(|m| m.role == Role::Tool) {
                Some(tool_message) => Ok(ChatResponse::text(tool_message.content.clone())),
                None => Ok(ChatResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "c".into(),
                        name: "cite".into(),
                        arguments: json!({}),
                    }],
                }),
            }
        }));

        let agent = RoleAgent::new("supervisor", model.clone()).with_tool(Arc::new(Rejecting));
        let output = agent.invoke(vec![ChatMessage::user("x")]).await.unwrap();
        assert_eq!(output, "Tool `cite` failed: missing required input: content");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn agent_stops_after_step_limit() {
        let model = Arc::new(ScriptedModel::new(|_| {
            Ok(ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "loop".into(),
                    name: "date".into(),
                    arguments: json!({}),
                }],
            })
        }));
        let agent = RoleAgent::new("looper", model.clone())
            .with_tool(Arc::new(CurrentDateTool))
            .with_max_steps(3);

        let err = agent.invoke(vec![ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, HelperError::Agent { .. }));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn model_errors_propagate_unchanged() {
        let agent = RoleAgent::new("a", Arc::new(ScriptedModel::failing("quota exceeded")));
        let err = agent.invoke(vec![ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, HelperError::Model(reason) if reason == "quota exceeded"));
    }

    #[tokio::test]
    async fn search_tool_reports_failures_as_text() {
        struct Broken;
        #[async_trait]
        impl SearchProvider for Broken {
            async fn search(
                &self,
                _query: &str,
                _max_results: usize,
            ) -> Result<Vec<SearchResult>, HelperError> {
                Err(HelperError::Search("rate limited".into()))
            }
        }

        let tool = WebSearchTool::new(Arc::new(Broken), 2);
        let output = tool.call(json!({"query": "wind"})).await.unwrap();
        assert_eq!(
            output,
            "Web search failed: rate limited. Please try a different query."
        );
    }

    #[tokio::test]
    async fn date_tool_uses_expected_format() {
        let output = CurrentDateTool.call(json!({})).await.unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(&output, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
