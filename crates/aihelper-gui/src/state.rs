use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics;
use aihelper_core::{Assistant, ConfigLoader, PipelineKind};
use anyhow::Result;
use axum::http::StatusCode;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    assistant: Arc<Assistant>,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    max_upload_bytes: usize,
    gui_enabled: bool,
    auth_token: Option<Arc<String>>,
    sweep_interval: Option<Duration>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CapacityMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub running_requests: usize,
    pub active_sessions: usize,
}

impl AppState {
    pub fn new(config: &AppConfig, assistant: Arc<Assistant>) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            assistant,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            max_upload_bytes: config.max_upload_bytes,
            gui_enabled: config.gui_enabled,
            auth_token: config
                .auth_token
                .as_ref()
                .map(|token| Arc::new(token.to_string())),
            sweep_interval: None,
        }
    }

    /// Check for idle sessions every `interval`.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Load the core configuration and connect the hosted collaborators.
    pub async fn try_new(config: &AppConfig) -> Result<Self> {
        let core_config = ConfigLoader::load(config.config_path.clone())?;
        let assistant = Assistant::from_config(&core_config).await?;
        info!(
            model = %core_config.llm.model,
            mode = ?core_config.research.mode,
            "assistant ready"
        );
        Ok(Self::new(config, Arc::new(assistant)).with_sweep_interval(Duration::from_secs(
            core_config.sessions.sweep_interval_secs,
        )))
    }

    /// Periodically end idle sessions so abandoned ids do not keep their
    /// results and vector files. `None` when sweeping is disabled.
    pub fn spawn_session_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.sweep_interval?;
        let assistant = self.assistant.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = assistant.expire_idle_sessions().await {
                    warn!(error = %err, "idle session sweep failed");
                }
            }
        }))
    }

    pub fn assistant(&self) -> Arc<Assistant> {
        self.assistant.clone()
    }

    pub fn gui_enabled(&self) -> bool {
        self.gui_enabled
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.clone()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn metrics(&self) -> CapacityMetrics {
        let available_permits = self.semaphore.available_permits();
        CapacityMetrics {
            max_concurrency: self.max_concurrency,
            available_permits,
            running_requests: self.max_concurrency.saturating_sub(available_permits),
            active_sessions: self.assistant.sessions().session_count(),
        }
    }

    /// Run one pipeline operation under the concurrency limit.
    pub async fn run<T, F>(
        &self,
        session_id: &str,
        pipeline: PipelineKind,
        operation: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = aihelper_core::Result<T>>,
    {
        let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down")
        })?;
        metrics::pipeline_started(session_id, pipeline, self.semaphore.available_permits());

        let started = Instant::now();
        match operation.await {
            Ok(value) => {
                metrics::pipeline_completed(session_id, pipeline, started.elapsed().as_millis());
                Ok(value)
            }
            Err(err) => {
                metrics::pipeline_failed(session_id, pipeline, &err.to_string());
                Err(AppError::from(err))
            }
        }
    }
}
