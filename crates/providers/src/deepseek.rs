//! DeepSeek adapter.
//!
//! DeepSeek exposes an OpenAI-compatible `/chat/completions` endpoint:
//! flat `messages` with `tool_calls` / `tool_call_id`, OpenAI-style
//! `choices` and `usage`, and SSE `delta` chunks terminated by `[DONE]`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Embeddings, when an embedding model is configured

use crate::retry::RetryPolicy;
use crate::transport::Transport;
use async_trait::async_trait;
use modelgate_core::adapter::ModelAdapter;
use modelgate_core::error::AdapterError;
use modelgate_core::message::{FunctionCall, Message, Role, ToolCall};
use modelgate_core::request::ChatRequest;
use modelgate_core::response::{ChatResponse, Choice, FinishReason, Usage};
use modelgate_core::stream::StreamCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

const DEFAULT_MODELS: [&str; 2] = ["deepseek-chat", "deepseek-coder"];

/// Adapter for DeepSeek chat models.
pub struct DeepSeekAdapter {
    api_key: String,
    base_url: String,
    models: Vec<String>,
    embedding_model: Option<String>,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl DeepSeekAdapter {
    pub fn new(api_key: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            embedding_model: None,
            retry: RetryPolicy::default(),
            transport,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the built-in model list. An empty list is ignored.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        if !models.is_empty() {
            self.models = models;
        }
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn role_to_wire(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Unknown roles decode as assistant output.
    pub fn role_from_wire(role: &str) -> Role {
        match role {
            "system" => Role::System,
            "user" => Role::User,
            "tool" | "function" => Role::Tool,
            _ => Role::Assistant,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("Authorization", format!("Bearer {}", self.api_key))]
    }

    fn resolve_model(&self, request: &ChatRequest) -> String {
        request
            .requested_model()
            .map(String::from)
            .or_else(|| self.models.first().cloned())
            .unwrap_or_else(|| DEFAULT_MODELS[0].to_string())
    }

    /// Convert our Message types to the OpenAI wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: Self::role_to_wire(m.role).into(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.tool_calls.clone())
                },
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
            })
            .collect()
    }

    fn build_body(request: &ChatRequest, model: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": stream,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = serde_json::json!(choice);
            }
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    fn parse_response(value: serde_json::Value, model: &str) -> Result<ChatResponse, AdapterError> {
        let api: ApiResponse = serde_json::from_value(value)
            .map_err(|e| AdapterError::Parse(format!("Failed to parse response: {e}")))?;

        if api.choices.is_empty() {
            return Err(AdapterError::Parse("No choices in response".into()));
        }

        let choices = api
            .choices
            .into_iter()
            .enumerate()
            .map(|(i, c)| Choice {
                index: c.index.unwrap_or(i as u32),
                message: Message {
                    role: Self::role_from_wire(&c.message.role),
                    content: c.message.content.unwrap_or_default(),
                    tool_calls: c.message.tool_calls.unwrap_or_default(),
                    tool_call_id: c.message.tool_call_id,
                    name: c.message.name,
                },
                finish_reason: c
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::from_wire)
                    .unwrap_or_default(),
            })
            .collect();

        let usage = api
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));

        Ok(ChatResponse::success(
            api.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            api.model.unwrap_or_else(|| model.to_string()),
            choices,
            usage,
        ))
    }
}

#[async_trait]
impl ModelAdapter for DeepSeekAdapter {
    fn name(&self) -> &str {
        "DeepSeek"
    }

    fn supports(&self, model: &str) -> bool {
        self.models
            .iter()
            .any(|m| model == m || model.starts_with(m.as_str()))
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        request.validate()?;
        let model = self.resolve_model(&request);
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers();
        let body = Self::build_body(&request, &model, false);

        debug!(adapter = "DeepSeek", model = %model, "Sending chat request");

        let value = self
            .retry
            .execute(|| self.transport.post_json(&url, &headers, &body))
            .await?;

        Self::parse_response(value, &model)
    }

    async fn chat_stream(&self, request: ChatRequest, callback: Arc<dyn StreamCallback>) {
        if let Err(e) = request.validate() {
            callback.on_error(e);
            return;
        }

        let model = self.resolve_model(&request);
        let url = format!("{}/chat/completions", self.base_url);
        let mut headers = self.headers();
        headers.push(("Accept", "text/event-stream".into()));
        let body = Self::build_body(&request, &model, true);

        debug!(adapter = "DeepSeek", model = %model, "Sending streaming request");

        let mut events = match self
            .retry
            .execute(|| self.transport.post_sse(&url, &headers, &body))
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                callback.on_error(e);
                return;
            }
        };

        let mut assembler = StreamAssembler::new(&model);
        while let Some(event) = events.recv().await {
            let data = match event {
                Ok(data) => data,
                Err(e) => {
                    callback.on_error(e);
                    return;
                }
            };

            if data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<StreamResponse>(&data) {
                Ok(chunk) => {
                    if let Some(token) = assembler.apply(chunk) {
                        callback.on_token(&token);
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        callback.on_complete(assembler.finish());
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        let Some(model) = &self.embedding_model else {
            return Err(AdapterError::Unsupported {
                adapter: self.name().to_string(),
                operation: "embed".into(),
            });
        };
        if text.is_empty() {
            return Err(AdapterError::InvalidRequest("Text cannot be empty".into()));
        }

        let url = format!("{}/embeddings", self.base_url);
        let headers = self.headers();
        let body = serde_json::json!({
            "model": model,
            "input": text,
            "encoding_format": "float",
        });

        debug!(adapter = "DeepSeek", model = %model, "Sending embedding request");

        let value = self
            .retry
            .execute(|| self.transport.post_json(&url, &headers, &body))
            .await?;

        let api: EmbeddingApiResponse = serde_json::from_value(value)
            .map_err(|e| AdapterError::Parse(format!("Failed to parse embedding response: {e}")))?;

        api.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AdapterError::Parse("No embedding in response".into()))
    }
}

/// Folds streamed deltas into the final response.
struct StreamAssembler {
    id: Option<String>,
    model: String,
    content: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamAssembler {
    fn new(model: &str) -> Self {
        Self {
            id: None,
            model: model.to_string(),
            content: String::new(),
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Apply one chunk; returns the content delta, if any.
    fn apply(&mut self, chunk: StreamResponse) -> Option<String> {
        if self.id.is_none() {
            self.id = chunk.id;
        }
        if let Some(model) = chunk.model {
            self.model = model;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }

        let choice = chunk.choices.into_iter().next()?;

        for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(tc_delta.index).or_default();
            if let Some(id) = tc_delta.id {
                acc.id = id;
            }
            if let Some(func) = tc_delta.function {
                if let Some(name) = func.name {
                    acc.name = name;
                }
                if let Some(args) = func.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(FinishReason::from_wire(&reason));
        }

        let token = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&token);
        Some(token)
    }

    fn finish(self) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|acc| acc.to_tool_call())
            .collect();

        let finish_reason = self.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        ChatResponse::from_message(
            self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            self.model,
            Message::assistant_with_tools(self.content, tool_calls),
            finish_reason,
            self.usage,
        )
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.id.clone(),
            r#type: "function".into(),
            function: FunctionCall {
                name: self.name.clone(),
                arguments: self.arguments.clone(),
            },
        }
    }
}

// --- OpenAI-style wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: Option<u32>,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
