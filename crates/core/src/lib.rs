//! # ModelGate Core
//!
//! Domain types, traits, and error definitions for the ModelGate LLM gateway.
//! This crate has **zero framework dependencies**. It defines the uniform
//! chat contract that every provider adapter, the gateway, and the context
//! engine implement against.
//!
//! Every collaborator (model adapters, stream callbacks, semantic search,
//! memory) is a trait here. Implementations live in their own crates, which
//! all depend inward on core.

pub mod adapter;
pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod request;
pub mod response;
pub mod search;
pub mod stream;

// Re-export key types at crate root for ergonomics
pub use adapter::{ModelAdapter, ModelInfo};
pub use context::{CodeSnippet, Context, CursorPosition, estimate_tokens};
pub use error::{AdapterError, ContextError, GatewayError, RegistryError};
pub use memory::{Memory, MemoryKind, MemoryProvider};
pub use message::{FunctionCall, FunctionDefinition, Message, Role, ToolCall, ToolDefinition};
pub use request::ChatRequest;
pub use response::{ChatResponse, Choice, FinishReason, ResponseError, Usage};
pub use search::SemanticSearch;
pub use stream::{ChannelCallback, StreamCallback, StreamEvent, TerminalGuard};
