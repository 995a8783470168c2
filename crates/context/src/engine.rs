//! Context engine: assemble, then trim.
//!
//! [`ContextEngine::build_context`] gathers the current file, retrieved
//! snippets, session history, project rules, long-term memories and caller
//! extras into a [`Context`], then trims it to the configured token budget
//! (see [`crate::trim`]).

use crate::trim::{TrimReport, trim_to_budget};
use modelgate_config::ContextConfig;
use modelgate_core::context::{Context, CursorPosition};
use modelgate_core::error::ContextError;
use modelgate_core::memory::{Memory, MemoryKind, MemoryProvider};
use modelgate_core::message::Message;
use modelgate_core::search::SemanticSearch;
use std::sync::Arc;
use tracing::{debug, info};

/// Lines taken on each side of the cursor for a completion query.
const QUERY_WINDOW_LINES: usize = 5;

/// Inputs for one context assembly.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub current_file_path: Option<String>,
    pub current_file_content: Option<String>,
    pub cursor_position: Option<CursorPosition>,
    /// Run semantic search for `query` (default on)
    pub enable_rag: bool,
    /// Attach the project's long-term memories (default off)
    pub include_long_term_memory: bool,
    /// Copied into the context verbatim
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Default for ContextRequest {
    fn default() -> Self {
        Self {
            query: None,
            session_id: None,
            project_id: None,
            current_file_path: None,
            current_file_content: None,
            cursor_position: None,
            enable_rag: true,
            include_long_term_memory: false,
            extras: serde_json::Map::new(),
        }
    }
}

impl ContextRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.current_file_path = Some(path.into());
        self.current_file_content = Some(content.into());
        self
    }

    pub fn with_cursor(mut self, cursor: CursorPosition) -> Self {
        self.cursor_position = Some(cursor);
        self
    }

    pub fn with_rag(mut self, enable: bool) -> Self {
        self.enable_rag = enable;
        self
    }

    pub fn with_long_term_memory(mut self, include: bool) -> Self {
        self.include_long_term_memory = include;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

/// Builds model-ready contexts from injected search and memory collaborators.
///
/// Holds no per-call state; one engine can serve concurrent callers.
pub struct ContextEngine {
    search: Arc<dyn SemanticSearch>,
    memory: Arc<dyn MemoryProvider>,
    config: ContextConfig,
}

impl ContextEngine {
    pub fn new(
        search: Arc<dyn SemanticSearch>,
        memory: Arc<dyn MemoryProvider>,
        config: ContextConfig,
    ) -> Self {
        Self {
            search,
            memory,
            config,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assemble a context for `request` and trim it to the token budget.
    pub async fn build_context(&self, request: ContextRequest) -> Result<Context, ContextError> {
        let (context, _) = self.build_context_with_report(request).await?;
        Ok(context)
    }

    /// Like [`build_context`](Self::build_context), also returning what the
    /// trimming pass dropped.
    pub async fn build_context_with_report(
        &self,
        request: ContextRequest,
    ) -> Result<(Context, TrimReport), ContextError> {
        let mut context = Context::new();
        let project_id = request.project_id.as_deref();

        if let Some(path) = request.current_file_path {
            context.current_file_path = Some(path);
            context.current_file_content = request.current_file_content;
            context.cursor_position = request.cursor_position;
        }

        if request.enable_rag
            && let Some(query) = request.query.as_deref().filter(|q| !q.trim().is_empty())
        {
            context.code_snippets = self
                .search
                .search(query, self.config.rag_top_k, project_id)
                .await?;
        }

        if let Some(session_id) = request.session_id.as_deref() {
            context.conversation_history = self.session_history(session_id).await?;
        }

        if let Some(project_id) = project_id {
            let memories = self
                .memory
                .retrieve_project_memories(project_id, MemoryKind::LongTerm)
                .await?;
            context.project_rules = memories.iter().map(|m| m.content.clone()).collect();
            if request.include_long_term_memory {
                context.long_term_memories = memories;
            }
        }

        context.extras = request.extras;

        let report = trim_to_budget(&mut context, self.config.max_context_length);
        if report.drops.is_empty() {
            debug!(tokens = report.tokens_after, "Context assembled");
        } else {
            info!(
                tokens_before = report.tokens_before,
                tokens_after = report.tokens_after,
                budget = report.budget,
                items_dropped = report.items_dropped(),
                "Context trimmed to budget"
            );
        }

        Ok((context, report))
    }

    /// Session history as assistant messages, capped to the most recent
    /// `max_history_messages`.
    async fn session_history(&self, session_id: &str) -> Result<Vec<Message>, ContextError> {
        let memories = self
            .memory
            .retrieve_session_memories(session_id, MemoryKind::ShortTerm)
            .await?;

        let mut history: Vec<Message> = memories
            .into_iter()
            .filter(|m| m.kind == MemoryKind::ShortTerm)
            .map(|m| Message::assistant(m.content))
            .collect();

        let cap = self.config.max_history_messages;
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }
        Ok(history)
    }

    /// Context for code completion: the query is the code around the cursor.
    pub async fn build_completion_context(
        &self,
        file_path: &str,
        file_content: &str,
        cursor: CursorPosition,
        project_id: Option<&str>,
    ) -> Result<Context, ContextError> {
        let mut request = ContextRequest::new()
            .with_file(file_path, file_content)
            .with_cursor(cursor)
            .with_query(extract_context_query(file_content, cursor));
        request.project_id = project_id.map(str::to_string);

        self.build_context(request).await
    }

    /// Context for a chat turn, including long-term memories.
    pub async fn build_chat_context(
        &self,
        query: &str,
        session_id: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<Context, ContextError> {
        let mut request = ContextRequest::new()
            .with_query(query)
            .with_long_term_memory(true);
        request.session_id = session_id.map(str::to_string);
        request.project_id = project_id.map(str::to_string);

        self.build_context(request).await
    }

    /// Record the context's file as a short-term memory of the session.
    ///
    /// No-op without a session id or without file content.
    pub async fn save_context(
        &self,
        session_id: Option<&str>,
        _project_id: Option<&str>,
        context: &Context,
    ) -> Result<(), ContextError> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        if context.current_file_content.is_none() {
            return Ok(());
        }

        let memory = Memory::short_term(
            format!("ctx-{}", uuid::Uuid::new_v4()),
            session_id,
            context.current_file_path.clone().unwrap_or_default(),
        );
        debug!(session_id, memory_id = %memory.id, "Saving context to session memory");
        self.memory.add_memory(memory).await
    }

    /// Append one conversation turn to the session's short-term memory.
    ///
    /// Later `build_context` calls replay it as history.
    pub async fn save_message(&self, session_id: &str, message: &Message) -> Result<(), ContextError> {
        let memory = Memory::short_term(
            format!("msg-{}", uuid::Uuid::new_v4()),
            session_id,
            message.content.clone(),
        );
        debug!(session_id, role = message.role.as_str(), "Saving message to session memory");
        self.memory.add_memory(memory).await
    }
}

/// The lines from `cursor.line - 5` up to (not including) `cursor.line + 5`,
/// each newline-terminated.
pub fn extract_context_query(file_content: &str, cursor: CursorPosition) -> String {
    let lines: Vec<&str> = file_content.split('\n').collect();
    let start = cursor.line.saturating_sub(QUERY_WINDOW_LINES);
    let end = lines.len().min(cursor.line.saturating_add(QUERY_WINDOW_LINES));

    let mut query = String::new();
    for line in lines.iter().take(end).skip(start) {
        query.push_str(line);
        query.push('\n');
    }
    query
}
