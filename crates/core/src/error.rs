//! Error types for the ModelGate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.
//!
//! The `Display` text of [`AdapterError`] is part of the contract: the
//! default retry classifier matches it against the transient markers
//! `timeout`, `429`, `503` and `connection`.

use thiserror::Error;

// --- Provider side ---

/// A failure raised by a model adapter or its transport.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by provider (429), retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable (503): {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Operation not supported by {adapter}: {operation}")]
    Unsupported { adapter: String, operation: String },

    #[error("Adapter not configured: {0}")]
    NotConfigured(String),

    #[error("Operation failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AdapterError>,
    },

    #[error("Retry interrupted after {attempts} attempts")]
    Interrupted {
        attempts: u32,
        #[source]
        source: Box<AdapterError>,
    },
}

impl AdapterError {
    /// The innermost failure, unwrapping retry aggregates.
    pub fn root_cause(&self) -> &AdapterError {
        match self {
            Self::RetriesExhausted { source, .. } | Self::Interrupted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

// --- Registry ---

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// --- Gateway (caller-facing) ---

/// Errors surfaced to callers of the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No model available")]
    NoModelAvailable,

    #[error("No adapter available for model: {model}")]
    NoAdapter { model: String },

    #[error("Adapter not available: {adapter}")]
    AdapterUnavailable { adapter: String },

    #[error("All models failed (tried: {})", tried.join(", "))]
    AllModelsFailed {
        tried: Vec<String>,
        #[source]
        source: Option<AdapterError>,
    },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

// --- Context assembly ---

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Semantic search failed: {0}")]
    Search(String),

    #[error("Memory retrieval failed: {0}")]
    Memory(String),
}
