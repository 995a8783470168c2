//! In-memory collaborators for tests and ephemeral sessions.

use async_trait::async_trait;
use modelgate_core::context::CodeSnippet;
use modelgate_core::error::ContextError;
use modelgate_core::memory::{Memory, MemoryKind, MemoryProvider};
use modelgate_core::search::SemanticSearch;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A memory provider that keeps every record in a Vec, in insertion order.
pub struct InMemoryMemoryStore {
    entries: RwLock<Vec<Memory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryProvider for InMemoryMemoryStore {
    async fn retrieve_session_memories(
        &self,
        session_id: &str,
        kind: MemoryKind,
    ) -> Result<Vec<Memory>, ContextError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|m| m.kind == kind && m.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn retrieve_project_memories(
        &self,
        project_id: &str,
        kind: MemoryKind,
    ) -> Result<Vec<Memory>, ContextError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|m| m.kind == kind && m.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect())
    }

    async fn add_memory(&self, mut memory: Memory) -> Result<(), ContextError> {
        if memory.id.is_empty() {
            memory.id = Uuid::new_v4().to_string();
        }
        self.entries.write().await.push(memory);
        Ok(())
    }
}

/// Keyword-overlap snippet index.
///
/// A snippet's score is the fraction of distinct query terms that also
/// appear among its own terms. Snippets without any shared term are not
/// returned.
pub struct InMemorySearch {
    snippets: RwLock<Vec<(Option<String>, CodeSnippet)>>,
}

impl InMemorySearch {
    pub fn new() -> Self {
        Self {
            snippets: RwLock::new(Vec::new()),
        }
    }

    /// Index `snippet`, optionally owned by a project.
    pub async fn add(&self, project_id: Option<&str>, snippet: CodeSnippet) {
        self.snippets
            .write()
            .await
            .push((project_id.map(str::to_string), snippet));
    }

    pub async fn len(&self) -> usize {
        self.snippets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snippets.read().await.is_empty()
    }
}

impl Default for InMemorySearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased identifier-like words longer than one character.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl SemanticSearch for InMemorySearch {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        project_id: Option<&str>,
    ) -> Result<Vec<CodeSnippet>, ContextError> {
        let query_terms = terms(query);
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let snippets = self.snippets.read().await;
        let mut results: Vec<CodeSnippet> = snippets
            .iter()
            .filter(|(owner, _)| project_id.is_none() || owner.as_deref() == project_id)
            .filter_map(|(_, snippet)| {
                let own = terms(&snippet.content);
                let shared = query_terms.iter().filter(|t| own.contains(*t)).count();
                if shared == 0 {
                    return None;
                }
                let mut hit = snippet.clone();
                hit.score = shared as f32 / query_terms.len() as f32;
                Some(hit)
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}
