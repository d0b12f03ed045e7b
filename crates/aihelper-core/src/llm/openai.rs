// OpenAI-compatible chat completion and embedding adapters.
// Reference: https://platform.openai.com/docs/api-reference/chat

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{ChatMessage, ChatModel, ChatRequest, ChatResponse, Embedder, Role, ToolCall};
use crate::{HelperError, SecretValue};

pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: SecretValue,
    model: String,
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments object.
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretValue,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HelperError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

fn decode_tool_call(call: WireToolCall) -> ToolCall {
    // Models occasionally emit malformed JSON; hand it to the tool verbatim.
    let arguments = serde_json::from_str(&call.function.arguments)
        .unwrap_or(Value::String(call.function.arguments));
    ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    }
}

async fn read_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<WireErrorResponse>(&body) {
        Ok(parsed) => format!("{status}: {}", parsed.error.message),
        Err(_) => format!("{status}: {body}"),
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(name = "llm.chat", skip(self, request), fields(model = %self.model, messages = request.messages.len(), tools = request.tools.len()))]
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, HelperError> {
        let body = WireChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunctionSpec {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HelperError::Model(read_error(response).await));
        }

        let parsed: WireChatResponse = response.json().await?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| HelperError::Model("response contained no choices".into()))?;

        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(decode_tool_call)
            .collect();

        debug!(tool_calls = tool_calls.len(), "chat completion received");

        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: SecretValue,
    model: String,
}

#[derive(Serialize)]
struct WireEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretValue,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HelperError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(name = "llm.embed", skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, HelperError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&WireEmbeddingRequest {
                model: &self.model,
                input: &texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HelperError::Model(read_error(response).await));
        }

        let mut parsed: WireEmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(HelperError::Model(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|row| row.index);
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}
