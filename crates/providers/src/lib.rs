//! Model adapters for ModelGate.
//!
//! All adapters implement the `modelgate_core::ModelAdapter` trait and run
//! their provider calls through a shared [`RetryPolicy`]. The
//! [`AdapterRegistry`] maps model names onto adapters.

pub mod deepseek;
pub mod qwen;
pub mod registry;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use deepseek::DeepSeekAdapter;
pub use qwen::QwenAdapter;
pub use registry::{AdapterRegistry, build_from_config};
pub use retry::{RetryPolicy, RetryPredicate, is_transient};
pub use transport::{ReqwestTransport, SseLineBuffer, Transport};
