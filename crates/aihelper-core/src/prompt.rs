//! Prompt templates and the tools built from them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::HelperError;
use crate::agent::{Agent, Tool};
use crate::llm::{ChatMessage, Role, ToolSpec};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("invalid placeholder regex")
});

/// Named string inputs used to fill a template.
pub type PromptInputs = BTreeMap<String, String>;

/// Build [`PromptInputs`] from key/value pairs.
pub fn inputs<K, V, I>(pairs: I) -> PromptInputs
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Ordered chat messages containing `{placeholder}` markers.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplate {
    messages: Vec<(Role, String)>,
}

impl PromptTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.messages.push((Role::System, text.into()));
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages.push((Role::User, text.into()));
        self
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (_, text) in &self.messages {
            for caps in PLACEHOLDER.captures_iter(text) {
                let name = &caps[1];
                if !names.iter().any(|existing| existing == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Fill every placeholder. Substituted values are not rescanned, so inputs
    /// may safely contain braces.
    pub fn render(&self, inputs: &PromptInputs) -> Result<Vec<ChatMessage>, HelperError> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !inputs.contains_key(name))
        {
            return Err(HelperError::MissingInput(missing));
        }

        Ok(self
            .messages
            .iter()
            .map(|(role, text)| {
                let filled = PLACEHOLDER.replace_all(text, |caps: &Captures| {
                    inputs.get(&caps[1]).cloned().unwrap_or_default()
                });
                ChatMessage::new(*role, filled.into_owned())
            })
            .collect())
    }
}

/// A named function that fills a fixed template and forwards it to an agent.
pub struct PromptedTool {
    name: String,
    description: String,
    template: PromptTemplate,
    defaults: PromptInputs,
    executor: Arc<dyn Agent>,
}

impl PromptedTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: PromptTemplate,
        executor: Arc<dyn Agent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            template,
            defaults: PromptInputs::new(),
            executor,
        }
    }

    /// Value used for `placeholder` when a caller leaves it out.
    pub fn with_default(
        mut self,
        placeholder: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.defaults.insert(placeholder.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    #[instrument(name = "tool.prompted", skip(self, inputs), fields(tool = %self.name))]
    pub async fn invoke(&self, inputs: &PromptInputs) -> Result<String, HelperError> {
        let conversation = if self.defaults.is_empty() {
            self.template.render(inputs)?
        } else {
            let mut merged = self.defaults.clone();
            merged.extend(inputs.iter().map(|(key, value)| (key.clone(), value.clone())));
            self.template.render(&merged)?
        };
        let output = self.executor.invoke(conversation).await?;
        debug!(chars = output.len(), "prompted tool produced output");
        Ok(output)
    }
}

fn argument_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Tool for PromptedTool {
    fn spec(&self) -> ToolSpec {
        let placeholders = self.template.placeholders();
        let properties: Map<String, Value> = placeholders
            .iter()
            .map(|name| (name.clone(), json!({ "type": "string" })))
            .collect();
        let required: Vec<&String> = placeholders
            .iter()
            .filter(|name| !self.defaults.contains_key(*name))
            .collect();

        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, HelperError> {
        let named: PromptInputs = match arguments {
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), argument_to_string(value)))
                .collect(),
            // A bare string is accepted for single-input templates.
            Value::String(text) => match self.template.placeholders().as_slice() {
                [only] => inputs([(only.clone(), text)]),
                _ => PromptInputs::new(),
            },
            _ => PromptInputs::new(),
        };
        self.invoke(&named).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RoleAgent;
    use crate::llm::ScriptedModel;

    fn essay_template() -> PromptTemplate {
        PromptTemplate::new()
            .system("You are a teacher that reviews an essay.")
            .user("Review {text} in {style} style. Again: {text}")
    }

    #[test]
    fn placeholders_are_unique_and_ordered() {
        assert_eq!(essay_template().placeholders(), vec!["text", "style"]);
    }

    #[test]
    fn render_fills_every_occurrence_without_rescanning() {
        let messages = essay_template()
            .render(&inputs([("text", "{style}"), ("style", "APA")]))
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Review {style} in APA style. Again: {style}");
    }

    #[test]
    fn render_reports_missing_input() {
        let err = essay_template()
            .render(&inputs([("text", "draft")]))
            .unwrap_err();
        assert!(matches!(err, HelperError::MissingInput(name) if name == "style"));
    }

    #[tokio::test]
    async fn missing_input_skips_model_call() {
        let model = Arc::new(ScriptedModel::fixed("review"));
        let tool = PromptedTool::new(
            "review",
            "Reviews an essay",
            essay_template(),
            Arc::new(RoleAgent::new("reviewer", model.clone())),
        );

        assert!(tool.invoke(&PromptInputs::new()).await.is_err());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn defaults_fill_omitted_arguments() {
        let model = Arc::new(ScriptedModel::new(|request| {
            Ok(crate::llm::ChatResponse::text(
                request.last_user_message().unwrap_or_default().to_string(),
            ))
        }));
        let tool = PromptedTool::new(
            "review",
            "Reviews an essay",
            essay_template(),
            Arc::new(RoleAgent::new("reviewer", model)),
        )
        .with_default("style", "APA");

        assert_eq!(tool.spec().parameters["required"], json!(["text"]));
        let output = tool.call(json!({"text": "draft"})).await.unwrap();
        assert_eq!(output, "Review draft in APA style. Again: draft");

        let output = tool
            .call(json!({"text": "draft", "style": "MLA"}))
            .await
            .unwrap();
        assert_eq!(output, "Review draft in MLA style. Again: draft");
    }

    #[tokio::test]
    async fn tool_call_accepts_json_arguments() {
        let model = Arc::new(ScriptedModel::new(|request| {
            Ok(crate::llm::ChatResponse::text(
                request.last_user_message().unwrap_or_default().to_string(),
            ))
        }));
        let tool = PromptedTool::new(
            "review",
            "Reviews an essay",
            essay_template(),
            Arc::new(RoleAgent::new("reviewer", model)),
        );

        let spec = tool.spec();
        assert_eq!(spec.parameters["required"], json!(["text", "style"]));

        let output = tool
            .call(json!({"text": "draft", "style": 3}))
            .await
            .unwrap();
        assert_eq!(output, "Review draft in 3 style. Again: draft");
    }
}
