// Minimal W3C WebDriver client: new session, navigate, read source, quit.
// Reference: https://www.w3.org/TR/webdriver2/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::PageFetcher;
use crate::HelperError;

pub struct WebDriverFetcher {
    client: Client,
    endpoint: String,
    headless: bool,
}

#[derive(Deserialize)]
struct WireReply<T> {
    value: T,
}

#[derive(Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

impl WebDriverFetcher {
    pub fn new(
        endpoint: impl Into<String>,
        headless: bool,
        timeout: Duration,
    ) -> Result<Self, HelperError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headless,
        })
    }

    fn capabilities(&self) -> Value {
        let args: Vec<&str> = if self.headless {
            vec!["--headless=new", "--disable-gpu", "--no-sandbox"]
        } else {
            Vec::new()
        };
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }

    async fn open_session(&self) -> Result<String, HelperError> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|err| HelperError::Browser(format!("webdriver unreachable: {err}")))?;
        let reply: WireReply<NewSession> = read_reply(response).await?;
        Ok(reply.value.session_id)
    }

    async fn page_source(&self, session_id: &str, url: &str) -> Result<String, HelperError> {
        let response = self
            .client
            .post(format!("{}/session/{session_id}/url", self.endpoint))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|err| HelperError::Browser(err.to_string()))?;
        let _: WireReply<Value> = read_reply(response).await?;
        debug!(%url, "page loaded");

        let response = self
            .client
            .get(format!("{}/session/{session_id}/source", self.endpoint))
            .send()
            .await
            .map_err(|err| HelperError::Browser(err.to_string()))?;
        let reply: WireReply<String> = read_reply(response).await?;
        Ok(reply.value)
    }

    async fn close_session(&self, session_id: &str) {
        let result = self
            .client
            .delete(format!("{}/session/{session_id}", self.endpoint))
            .send()
            .await;
        if let Err(err) = result {
            warn!(session_id, error = %err, "failed to close webdriver session");
        }
    }
}

async fn read_reply<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, HelperError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| HelperError::Browser(err.to_string()))?;

    if !status.is_success() {
        let reason = serde_json::from_str::<WireReply<WireError>>(&body)
            .map(|reply| format!("{}: {}", reply.value.error, reply.value.message))
            .unwrap_or(body);
        return Err(HelperError::Browser(format!("{status}: {reason}")));
    }

    serde_json::from_str(&body)
        .map_err(|err| HelperError::Browser(format!("unexpected webdriver reply: {err}")))
}

#[async_trait]
impl PageFetcher for WebDriverFetcher {
    #[instrument(name = "fetch.webdriver", skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch(&self, url: &str) -> Result<String, HelperError> {
        info!("launching browser session");
        let session_id = self.open_session().await?;
        let result = self.page_source(&session_id, url).await;
        self.close_session(&session_id).await;
        result
    }
}
