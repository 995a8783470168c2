//! # ModelGate
//!
//! Wires the workspace together: an [`AdapterRegistry`] holding the DeepSeek
//! and Qwen adapters, an [`LlmGateway`] routing over it, and a
//! [`ContextEngine`] fed by caller-supplied search and memory collaborators.
//!
//! ```no_run
//! # async fn demo() -> Result<(), modelgate::ServiceError> {
//! use modelgate::{InMemoryMemoryStore, InMemorySearch, Services};
//! use std::sync::Arc;
//!
//! modelgate::init_tracing(false, false);
//! let services = Services::load(
//!     Arc::new(InMemorySearch::new()),
//!     Arc::new(InMemoryMemoryStore::new()),
//! )?;
//! let answer = services
//!     .chat_with_context("How is the config loaded?", Some("session-1"), None)
//!     .await?;
//! println!("{}", answer.content());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use modelgate_config::{AppConfig, ConfigError};
pub use modelgate_context::{ContextEngine, ContextRequest, InMemoryMemoryStore, InMemorySearch};
pub use modelgate_core::{
    AdapterError, ChatRequest, ChatResponse, Context, ContextError, GatewayError, MemoryProvider,
    Message, SemanticSearch,
};
pub use modelgate_gateway::LlmGateway;
pub use modelgate_providers::{AdapterRegistry, ReqwestTransport, Transport};

/// Overall HTTP timeout for provider calls.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from building or using [`Services`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP transport: {0}")]
    Transport(#[from] AdapterError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The assembled gateway services.
pub struct Services {
    pub registry: Arc<AdapterRegistry>,
    pub gateway: LlmGateway,
    pub context: ContextEngine,
}

impl Services {
    /// Load `~/.modelgate/config.toml` (plus env overrides) and build.
    pub fn load(
        search: Arc<dyn SemanticSearch>,
        memory: Arc<dyn MemoryProvider>,
    ) -> Result<Self, ServiceError> {
        let config = AppConfig::load()?;
        Self::from_config(&config, search, memory)
    }

    /// Build with a `reqwest` transport.
    pub fn from_config(
        config: &AppConfig,
        search: Arc<dyn SemanticSearch>,
        memory: Arc<dyn MemoryProvider>,
    ) -> Result<Self, ServiceError> {
        let transport = Arc::new(ReqwestTransport::new(HTTP_TIMEOUT)?);
        Ok(Self::with_transport(config, transport, search, memory))
    }

    /// Build over an explicit transport.
    pub fn with_transport(
        config: &AppConfig,
        transport: Arc<dyn Transport>,
        search: Arc<dyn SemanticSearch>,
        memory: Arc<dyn MemoryProvider>,
    ) -> Self {
        let registry = Arc::new(modelgate_providers::build_from_config(config, transport));
        let gateway = LlmGateway::from_config(registry.clone(), config);
        let context = ContextEngine::new(search, memory, config.context.clone());

        let available = registry
            .get_available_adapters()
            .iter()
            .map(|a| a.name().to_string())
            .collect::<Vec<_>>();
        info!(
            adapters = registry.len(),
            available = ?available,
            preferred = ?config.preferred_model,
            "ModelGate services ready"
        );

        Self {
            registry,
            gateway,
            context,
        }
    }

    /// One chat turn with assembled context.
    ///
    /// Rules, snippets and history from the context engine are prepended to
    /// the question; the question and the answer are then stored as session
    /// history when a session id is given.
    pub async fn chat_with_context(
        &self,
        query: &str,
        session_id: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<ChatResponse, ServiceError> {
        let context = self
            .context
            .build_chat_context(query, session_id, project_id)
            .await?;

        let mut messages = Vec::with_capacity(context.conversation_history.len() + 2);
        let system = context.build_system_prompt();
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.extend(context.conversation_history.iter().cloned());
        let question = Message::user(query);
        messages.push(question.clone());

        let mut request = ChatRequest::new(messages);
        let response = self.gateway.chat(&mut request).await?;

        if let Some(session_id) = session_id {
            self.context.save_message(session_id, &question).await?;
            if let Some(answer) = response.first_message() {
                self.context.save_message(session_id, answer).await?;
            }
        }

        Ok(response)
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` when `verbose`, else `info`.
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // A subscriber installed earlier (e.g. by the host application) stays in place
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
