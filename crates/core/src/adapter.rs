//! The ModelAdapter trait: the abstraction over LLM providers.
//!
//! An adapter knows how to translate the uniform [`ChatRequest`] into one
//! provider's wire format and normalize the answer back into a
//! [`ChatResponse`], either as a complete response or as a token stream.
//!
//! Implementations: DeepSeek (OpenAI-style flat messages), Qwen (DashScope
//! input envelope), test doubles.

use crate::error::AdapterError;
use crate::request::ChatRequest;
use crate::response::ChatResponse;
use crate::stream::StreamCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The core adapter trait.
///
/// Callers never branch on which provider sits behind it; variants differ
/// only in translation and role mapping.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Registry key for this adapter (e.g., "DeepSeek", "Qwen").
    fn name(&self) -> &str;

    /// Whether this adapter can serve `model`. Pure and infallible.
    fn supports(&self, model: &str) -> bool;

    /// Models registered in the exact-match index.
    fn supported_models(&self) -> Vec<String>;

    /// Cheap availability check (credentials present). Never touches the network.
    fn is_available(&self) -> bool;

    /// Send a request and get a complete response.
    ///
    /// Returns `Err` on unrecoverable failure; never a malformed response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError>;

    /// Stream a response through `callback`: zero or more `on_token`, then
    /// exactly one of `on_complete` / `on_error`.
    ///
    /// Default implementation calls `chat()` and delivers the content as a
    /// single token.
    async fn chat_stream(&self, request: ChatRequest, callback: Arc<dyn StreamCallback>) {
        match self.chat(request).await {
            Ok(response) => {
                let content = response.content().to_string();
                if !content.is_empty() {
                    callback.on_token(&content);
                }
                callback.on_complete(response);
            }
            Err(e) => callback.on_error(e),
        }
    }

    /// Generate an embedding vector for `text`.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AdapterError> {
        Err(AdapterError::Unsupported {
            adapter: self.name().to_string(),
            operation: "embed".into(),
        })
    }
}

/// Description of a routable model, as listed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
    /// Name of the adapter serving this model.
    pub provider: String,
    pub available: bool,
    pub supports_tool_calling: bool,
    pub supports_streaming: bool,
    /// "chat", "completion" or "embedding"
    pub model_type: String,
}

impl ModelInfo {
    pub fn chat(name: impl Into<String>, provider: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            provider: provider.into(),
            available: true,
            supports_tool_calling: true,
            supports_streaming: true,
            model_type: "chat".into(),
        }
    }
}
