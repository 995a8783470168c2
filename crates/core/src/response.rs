//! The normalized chat response every adapter translates into.

use crate::message::{Message, ToolCall};
use serde::{Deserialize, Serialize};

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map a provider's finish-reason string onto the closed set.
    ///
    /// Unknown or missing reasons are treated as a normal stop.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" | "sensitive" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Error => "error",
        }
    }
}

/// One generated alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Provider-reported failure carried inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

/// A complete chat response.
///
/// `choices` and `error` are mutually exclusive: a response built with
/// [`ChatResponse::success`] has choices and no error, one built with
/// [`ChatResponse::failure`] has an error and no choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,

    /// Which model actually responded
    pub model: String,

    /// Unix timestamp (seconds)
    pub created: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    choices: Vec<Choice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl ChatResponse {
    pub fn success(
        id: impl Into<String>,
        model: impl Into<String>,
        choices: Vec<Choice>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            choices,
            usage,
            error: None,
        }
    }

    /// Single-choice success response, the common case.
    pub fn from_message(
        id: impl Into<String>,
        model: impl Into<String>,
        message: Message,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> Self {
        Self::success(
            id,
            model,
            vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage,
        )
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: String::new(),
            created: chrono::Utc::now().timestamp(),
            choices: Vec::new(),
            usage: None,
            error: Some(ResponseError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn into_choices(self) -> Vec<Choice> {
        self.choices
    }

    pub fn error(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    pub fn first_message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }

    /// Text content of the first choice, empty when there is none.
    pub fn content(&self) -> &str {
        self.first_message().map(|m| m.content.as_str()).unwrap_or("")
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.first_message()
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().map(|c| c.finish_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let resp = ChatResponse::from_message(
            "r1",
            "deepseek-chat",
            Message::assistant("hello"),
            FinishReason::Stop,
            Some(Usage::new(10, 5)),
        );
        assert!(resp.is_success());
        assert!(resp.error().is_none());
        assert_eq!(resp.content(), "hello");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn failure_has_no_choices() {
        let resp = ChatResponse::failure("rate_limit", "slow down");
        assert!(!resp.is_success());
        assert!(resp.choices().is_empty());
        assert_eq!(resp.content(), "");
        assert_eq!(resp.error().unwrap().code, "rate_limit");
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_wire("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_wire("null"), FinishReason::Stop);
    }

    #[test]
    fn tool_calls_exposed_from_first_choice() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall::function("c1", "calc", "{}")],
        );
        let resp = ChatResponse::from_message("r", "m", msg, FinishReason::ToolCalls, None);
        assert!(resp.has_tool_calls());
        assert_eq!(resp.finish_reason(), Some(FinishReason::ToolCalls));
    }
}
