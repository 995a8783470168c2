//! Semantic search seam (the retrieval engine is an external collaborator).

use crate::context::CodeSnippet;
use crate::error::ContextError;
use async_trait::async_trait;

/// Ranked snippet retrieval.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Up to `top_k` snippets for `query`, most relevant first, optionally
    /// restricted to one project.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        project_id: Option<&str>,
    ) -> Result<Vec<CodeSnippet>, ContextError>;
}
