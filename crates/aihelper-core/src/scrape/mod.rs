//! Page fetching and HTML cleaning for the scraper pipeline.

mod html;
mod webdriver;

pub use html::{DEFAULT_MAX_CHUNK_LEN, clean_body, extract_body, split_content};
pub use webdriver::WebDriverFetcher;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::HelperError;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Rendered HTML of the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String, HelperError>;
}

pub type DynPageFetcher = Arc<dyn PageFetcher>;

/// Plain HTTP GET; no script execution.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, HelperError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aihelper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(name = "fetch.http", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String, HelperError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| HelperError::Browser(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HelperError::Browser(format!("{url} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|err| HelperError::Browser(err.to_string()))?;
        debug!(bytes = body.len(), "page fetched");
        Ok(body)
    }
}

/// Serves fixed pages by URL, for tests and offline runs.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, HelperError> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| HelperError::Browser(format!("no page registered for {url}")))
    }
}
