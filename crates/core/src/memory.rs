//! Memory records and the memory provider seam.
//!
//! Memories are created and persisted by an external store; the gateway
//! only reads them while assembling context (and writes back a short-term
//! record from `save_context`).

use crate::error::ContextError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime class of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryKind {
    /// Session-scoped (conversation history).
    ShortTerm,
    /// Project-scoped (rules, persistent facts).
    LongTerm,
}

/// A single memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,

    /// Owning session, for short-term memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Owning project, for long-term memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub kind: MemoryKind,

    pub content: String,

    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn short_term(
        id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: Some(session_id.into()),
            project_id: None,
            kind: MemoryKind::ShortTerm,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn long_term(
        id: impl Into<String>,
        project_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: None,
            project_id: Some(project_id.into()),
            kind: MemoryKind::LongTerm,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Source of session and project memories.
///
/// Implementations: in-memory store (tests, ephemeral sessions), external
/// long-term memory services.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Memories of `kind` owned by a session, oldest first.
    async fn retrieve_session_memories(
        &self,
        session_id: &str,
        kind: MemoryKind,
    ) -> Result<Vec<Memory>, ContextError>;

    /// Memories of `kind` owned by a project, most relevant first.
    async fn retrieve_project_memories(
        &self,
        project_id: &str,
        kind: MemoryKind,
    ) -> Result<Vec<Memory>, ContextError>;

    /// Persist a new memory.
    async fn add_memory(&self, memory: Memory) -> Result<(), ContextError>;
}
