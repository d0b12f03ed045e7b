use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatModel, ChatRequest, ChatResponse};
use crate::HelperError;

type Responder = dyn Fn(&ChatRequest) -> Result<ChatResponse, HelperError> + Send + Sync;

/// In-process chat model driven by a closure, for tests and offline runs.
///
/// Every request is recorded so callers can assert on the prompts that were
/// actually sent.
pub struct ScriptedModel {
    responder: Box<Responder>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse, HelperError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that answers every request with the same text.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(ChatResponse::text(reply.clone())))
    }

    /// A model whose every call fails with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(move |_| Err(HelperError::Model(reason.clone())))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, HelperError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.responder)(&request)
    }
}
