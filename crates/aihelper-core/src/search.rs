//! Web search collaborator.

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{HelperError, SecretValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default, alias = "snippet")]
    pub content: String,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<SearchResult>, HelperError>;
}

/// Render results the way prompts expect them: one block per result,
/// separated by `---` lines.
pub fn render_results(results: &[SearchResult]) -> String {
    let mut output = String::new();
    for (idx, result) in results.iter().enumerate() {
        if idx > 0 {
            output.push('\n');
        }
        let _ = write!(
            output,
            "Title: {}\nURL: {}\nContent: {}\n---",
            result.title, result.url, result.content
        );
    }
    output
}

/// Tavily search API client.
pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: SecretValue,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

impl TavilySearch {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, HelperError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    #[instrument(name = "search.tavily", skip(self))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, HelperError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&TavilyRequest { query, max_results })
            .send()
            .await
            .map_err(|err| HelperError::Search(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HelperError::Search(format!("{status}: {body}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|err| HelperError::Search(err.to_string()))?;

        debug!(results = parsed.results.len(), "search completed");
        Ok(parsed.results)
    }
}

/// Fixed result list for tests and offline runs; records every query.
pub struct StaticSearch {
    results: Vec<SearchResult>,
    queries: Mutex<Vec<(String, usize)>>,
}

impl StaticSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, HelperError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((query.to_string(), max_results));
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_results_formats_blocks() {
        let rendered = render_results(&[
            SearchResult::new("Wind", "https://a.example", "Turbines"),
            SearchResult::new("Solar", "https://b.example", "Panels"),
        ]);
        assert_eq!(
            rendered,
            "Title: Wind\nURL: https://a.example\nContent: Turbines\n---\n\
             Title: Solar\nURL: https://b.example\nContent: Panels\n---"
        );
    }

    #[test]
    fn render_results_empty() {
        assert_eq!(render_results(&[]), "");
    }

    #[test]
    fn snippet_is_accepted_as_content() {
        let parsed: SearchResult =
            serde_json::from_str(r#"{"title":"t","url":"u","snippet":"s"}"#).unwrap();
        assert_eq!(parsed.content, "s");
    }

    #[tokio::test]
    async fn static_search_limits_and_records() {
        let search = StaticSearch::new(vec![
            SearchResult::new("a", "u1", "c1"),
            SearchResult::new("b", "u2", "c2"),
        ]);
        let results = search.search("grid storage", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(search.queries(), vec![("grid storage".to_string(), 1)]);
    }
}
