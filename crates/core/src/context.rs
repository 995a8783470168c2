//! The assembled context handed to a model call.

use crate::memory::Memory;
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Rough token estimate: one token per four characters, rounded down.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Zero-based cursor location in the current file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: usize,
    pub column: usize,
}

impl CursorPosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A ranked excerpt returned by semantic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    /// Source file the excerpt came from.
    pub file_path: String,
    pub content: String,
    /// Similarity score; higher is more relevant.
    #[serde(default)]
    pub score: f32,
}

impl CodeSnippet {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            score,
        }
    }
}

/// Context gathered for one call.
///
/// Collections keep their source order: snippets relevance-descending,
/// history oldest-first, memories relevance-descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<CursorPosition>,

    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,

    #[serde(default)]
    pub conversation_history: Vec<Message>,

    #[serde(default)]
    pub project_rules: Vec<String>,

    #[serde(default)]
    pub long_term_memories: Vec<Memory>,

    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extras.get(key)
    }

    /// Approximate token count of the assembled context.
    ///
    /// Counts file content, snippets, history, rules and memories. The file
    /// path and extras are not counted.
    pub fn estimated_tokens(&self) -> usize {
        let file = self
            .current_file_content
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0);
        let snippets: usize = self.code_snippets.iter().map(|s| estimate_tokens(&s.content)).sum();
        let history: usize = self
            .conversation_history
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        let rules: usize = self.project_rules.iter().map(|r| estimate_tokens(r)).sum();
        let memories: usize = self
            .long_term_memories
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();

        file + snippets + history + rules + memories
    }

    /// Render rules, the current file and retrieved snippets as a markdown
    /// system prompt.
    pub fn build_system_prompt(&self) -> String {
        let mut prompt = String::new();

        if !self.project_rules.is_empty() {
            prompt.push_str("# Project Rules\n");
            for rule in &self.project_rules {
                prompt.push_str("- ");
                prompt.push_str(rule);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if let Some(path) = &self.current_file_path {
            prompt.push_str(&format!("# Current File: {path}\n"));
            if let Some(content) = &self.current_file_content {
                prompt.push_str(&format!("```\n{content}\n```\n\n"));
            }
        }

        if !self.code_snippets.is_empty() {
            prompt.push_str("# Related Code Snippets\n");
            for (i, snippet) in self.code_snippets.iter().enumerate() {
                prompt.push_str(&format!(
                    "## Snippet {}: {}\n```\n{}\n```\n\n",
                    i + 1,
                    snippet.file_path,
                    snippet.content
                ));
            }
        }

        prompt
    }
}
