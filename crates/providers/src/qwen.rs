//! Qwen adapter (Alibaba Cloud DashScope).
//!
//! DashScope wraps messages in an `input` envelope and sampling settings in
//! `parameters`:
//!
//! ```json
//! {"model": "qwen-max",
//!  "input": {"messages": [{"role": "user", "content": "hi"}]},
//!  "parameters": {"result_format": "message", "temperature": 0.7}}
//! ```
//!
//! Answers arrive under `output.choices` (or `output.text` for the legacy
//! text format) with usage reported as `input_tokens` / `output_tokens`.
//! Streaming uses SSE with `X-DashScope-SSE: enable` and incremental output.

use crate::retry::RetryPolicy;
use crate::transport::Transport;
use async_trait::async_trait;
use modelgate_core::adapter::ModelAdapter;
use modelgate_core::error::AdapterError;
use modelgate_core::message::{Message, Role, ToolCall};
use modelgate_core::request::ChatRequest;
use modelgate_core::response::{ChatResponse, Choice, FinishReason, Usage};
use modelgate_core::stream::StreamCallback;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";

const DEFAULT_MODELS: [&str; 4] = ["qwen-max", "qwen-plus", "qwen-turbo", "qwen-coder"];

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v2";

/// Any model in the `qwen-` family is routable here.
const FAMILY_PREFIX: &str = "qwen-";

/// Adapter for Qwen models served by DashScope.
pub struct QwenAdapter {
    api_key: String,
    base_url: String,
    models: Vec<String>,
    embedding_model: String,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl QwenAdapter {
    pub fn new(api_key: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
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
        self.embedding_model = model.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn role_to_wire(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// DashScope's older `function` role maps onto tool results.
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

    fn generation_url(&self) -> String {
        format!("{}/services/aigc/text-generation/generation", self.base_url)
    }

    fn build_body(request: &ChatRequest, model: &str, stream: bool) -> serde_json::Value {
        let messages: Vec<WireMessage> = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: Self::role_to_wire(m.role).into(),
                content: m.content.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.tool_calls.clone())
                },
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
            })
            .collect();

        let mut parameters = serde_json::json!({ "result_format": "message" });
        if let Some(temperature) = request.temperature {
            parameters["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            parameters["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            parameters["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            parameters["stop"] = serde_json::json!(request.stop);
        }
        if !request.tools.is_empty() {
            parameters["tools"] = serde_json::json!(request.tools);
            if let Some(choice) = &request.tool_choice {
                parameters["tool_choice"] = serde_json::json!(choice);
            }
        }
        if stream {
            parameters["incremental_output"] = serde_json::json!(true);
        }

        serde_json::json!({
            "model": model,
            "input": { "messages": messages },
            "parameters": parameters,
        })
    }

    fn parse_response(value: serde_json::Value, model: &str) -> Result<ChatResponse, AdapterError> {
        let api: ApiResponse = serde_json::from_value(value)
            .map_err(|e| AdapterError::Parse(format!("Failed to parse response: {e}")))?;

        if let Some(code) = api.code.filter(|c| !c.is_empty()) {
            return Err(AdapterError::Api {
                status_code: 200,
                message: format!("{code}: {}", api.message.unwrap_or_default()),
            });
        }

        let output = api
            .output
            .ok_or_else(|| AdapterError::Parse("Missing output in response".into()))?;

        let choices: Vec<Choice> = if !output.choices.is_empty() {
            output
                .choices
                .into_iter()
                .enumerate()
                .map(|(i, c)| Choice {
                    index: i as u32,
                    message: c.message.into_message(),
                    finish_reason: finish_reason(c.finish_reason.as_deref()),
                })
                .collect()
        } else if let Some(text) = output.text {
            vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: finish_reason(output.finish_reason.as_deref()),
            }]
        } else {
            return Err(AdapterError::Parse("No choices in response".into()));
        };

        let usage = api
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens));

        Ok(ChatResponse::success(
            api.request_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            model,
            choices,
            usage,
        ))
    }
}

/// DashScope streams `"null"` as the finish reason of unfinished chunks.
fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        None | Some("null") | Some("") => FinishReason::Stop,
        Some(reason) => FinishReason::from_wire(reason),
    }
}

#[async_trait]
impl ModelAdapter for QwenAdapter {
    fn name(&self) -> &str {
        "Qwen"
    }

    fn supports(&self, model: &str) -> bool {
        model.starts_with(FAMILY_PREFIX)
            || self
                .models
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
        let url = self.generation_url();
        let headers = self.headers();
        let body = Self::build_body(&request, &model, false);

        debug!(adapter = "Qwen", model = %model, "Sending chat request");

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
        let url = self.generation_url();
        let mut headers = self.headers();
        headers.push(("X-DashScope-SSE", "enable".into()));
        headers.push(("Accept", "text/event-stream".into()));
        let body = Self::build_body(&request, &model, true);

        debug!(adapter = "Qwen", model = %model, "Sending streaming request");

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

        let mut request_id = None;
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut finish = FinishReason::Stop;
        let mut usage = None;

        while let Some(event) = events.recv().await {
            let data = match event {
                Ok(data) => data,
                Err(e) => {
                    callback.on_error(e);
                    return;
                }
            };

            let chunk: ApiResponse = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                    continue;
                }
            };

            if let Some(code) = chunk.code.filter(|c| !c.is_empty()) {
                callback.on_error(AdapterError::Api {
                    status_code: 200,
                    message: format!("{code}: {}", chunk.message.unwrap_or_default()),
                });
                return;
            }

            if request_id.is_none() {
                request_id = chunk.request_id;
            }
            if let Some(u) = chunk.usage {
                usage = Some(Usage::new(u.input_tokens, u.output_tokens));
            }

            let Some(output) = chunk.output else {
                continue;
            };

            let (delta, reason, calls) = match output.choices.into_iter().next() {
                Some(choice) => (
                    choice.message.content,
                    choice.finish_reason,
                    choice.message.tool_calls.unwrap_or_default(),
                ),
                None => (output.text, output.finish_reason, Vec::new()),
            };

            merge_tool_calls(&mut tool_calls, calls);
            if let Some(reason) = reason.as_deref().filter(|r| *r != "null") {
                finish = finish_reason(Some(reason));
            }
            if let Some(token) = delta.filter(|d| !d.is_empty()) {
                content.push_str(&token);
                callback.on_token(&token);
            }
        }

        callback.on_complete(ChatResponse::from_message(
            request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            model,
            Message::assistant_with_tools(content, tool_calls),
            finish,
            usage,
        ));
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        if text.is_empty() {
            return Err(AdapterError::InvalidRequest("Text cannot be empty".into()));
        }

        let url = format!(
            "{}/services/embeddings/text-embedding/text-embedding",
            self.base_url
        );
        let headers = self.headers();
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": { "texts": [text] },
        });

        debug!(adapter = "Qwen", model = %self.embedding_model, "Sending embedding request");

        let value = self
            .retry
            .execute(|| self.transport.post_json(&url, &headers, &body))
            .await?;

        let api: EmbeddingApiResponse = serde_json::from_value(value)
            .map_err(|e| AdapterError::Parse(format!("Failed to parse embedding response: {e}")))?;

        api.output
            .embeddings
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AdapterError::Parse("No embedding in response".into()))
    }
}

/// Fold incremental tool calls into the running list by position.
fn merge_tool_calls(acc: &mut Vec<ToolCall>, incoming: Vec<ToolCall>) {
    for (i, call) in incoming.into_iter().enumerate() {
        match acc.get_mut(i) {
            Some(existing) => {
                if !call.id.is_empty() {
                    existing.id = call.id;
                }
                if !call.function.name.is_empty() {
                    existing.function.name = call.function.name;
                }
                existing.function.arguments.push_str(&call.function.arguments);
            }
            None => acc.push(call),
        }
    }
}

// --- DashScope wire types (internal) ---

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    output: Option<ApiOutput>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOutput {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl ApiMessage {
    fn into_message(self) -> Message {
        Message {
            role: self
                .role
                .as_deref()
                .map(QwenAdapter::role_from_wire)
                .unwrap_or(Role::Assistant),
            content: self.content.unwrap_or_default(),
            tool_calls: self.tool_calls.unwrap_or_default(),
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    output: EmbeddingOutput,
}

#[derive(Debug, Deserialize)]
struct EmbeddingOutput {
    embeddings: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
