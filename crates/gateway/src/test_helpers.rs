//! Shared test helpers for gateway tests.

use async_trait::async_trait;
use modelgate_core::adapter::ModelAdapter;
use modelgate_core::error::AdapterError;
use modelgate_core::message::Message;
use modelgate_core::request::ChatRequest;
use modelgate_core::response::{ChatResponse, FinishReason, Usage};
use modelgate_core::stream::StreamCallback;
use modelgate_providers::RetryPolicy;
use std::sync::{Arc, Mutex};

/// A scripted adapter that records every request it sees.
///
/// Serves exactly the listed models. `embed` returns a one-element vector
/// holding the text length.
pub struct MockAdapter {
    name: String,
    models: Vec<String>,
    outcome: Result<String, AdapterError>,
    available: bool,
    silent_stream: bool,
    retry: RetryPolicy,
    requests: Mutex<Vec<ChatRequest>>,
    calls: Mutex<usize>,
    embed_calls: Mutex<usize>,
}

impl MockAdapter {
    fn build(name: &str, models: &[&str], outcome: Result<String, AdapterError>) -> Self {
        Self {
            name: name.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            outcome,
            available: true,
            silent_stream: false,
            retry: RetryPolicy::none(),
            requests: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            embed_calls: Mutex::new(0),
        }
    }

    pub fn answering(name: &str, models: &[&str], text: &str) -> Arc<Self> {
        Arc::new(Self::build(name, models, Ok(text.to_string())))
    }

    pub fn failing(name: &str, models: &[&str], error: AdapterError) -> Arc<Self> {
        Arc::new(Self::build(name, models, Err(error)))
    }

    /// Same adapter with `is_available() == false`.
    pub fn unavailable(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|a| a.available = false)
    }

    /// Same adapter whose stream returns without any terminal callback.
    pub fn silent_stream(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|a| a.silent_stream = true)
    }

    pub fn with_retry(self: Arc<Self>, retry: RetryPolicy) -> Arc<Self> {
        self.rebuild(|a| a.retry = retry)
    }

    fn rebuild(self: Arc<Self>, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut adapter = Self::build(
            &self.name,
            &self.models.iter().map(String::as_str).collect::<Vec<_>>(),
            self.outcome.clone(),
        );
        adapter.available = self.available;
        adapter.silent_stream = self.silent_stream;
        adapter.retry = self.retry.clone();
        f(&mut adapter);
        Arc::new(adapter)
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn embed_calls(&self) -> usize {
        *self.embed_calls.lock().unwrap()
    }

    pub fn seen_models(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.model.clone().unwrap_or_default())
            .collect()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn answer(&self, model: &str) -> Result<ChatResponse, AdapterError> {
        *self.calls.lock().unwrap() += 1;
        match &self.outcome {
            Ok(text) => Ok(ChatResponse::from_message(
                "mock-id",
                model,
                Message::assistant(text.clone()),
                FinishReason::Stop,
                Some(Usage::new(10, 5)),
            )),
            Err(e) => Err(e.clone()),
        }
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let model_name = request.model.clone().unwrap_or_default();
        self.requests.lock().unwrap().push(request);
        let model = model_name.as_str();
        self.retry
            .execute(move || async move { self.answer(model) })
            .await
    }

    async fn chat_stream(&self, request: ChatRequest, callback: Arc<dyn StreamCallback>) {
        if self.silent_stream {
            self.requests.lock().unwrap().push(request);
            return;
        }
        match self.chat(request).await {
            Ok(response) => {
                callback.on_token(response.content());
                callback.on_complete(response);
            }
            Err(e) => callback.on_error(e),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        *self.embed_calls.lock().unwrap() += 1;
        Ok(vec![text.len() as f32])
    }
}
