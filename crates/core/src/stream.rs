//! Streaming callbacks.
//!
//! Streaming results are pushed into a caller-supplied [`StreamCallback`]:
//! zero or more tokens followed by exactly one terminal callback. Delivery
//! may happen on a task other than the caller's.

use crate::error::AdapterError;
use crate::response::ChatResponse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Receiver of a streamed chat response.
pub trait StreamCallback: Send + Sync {
    /// A content delta.
    fn on_token(&self, token: &str);

    /// The stream finished; `response` holds the assembled message.
    fn on_complete(&self, response: ChatResponse);

    /// The stream failed. No further callbacks follow.
    fn on_error(&self, error: AdapterError);
}

/// Enforces the ordering contract around another callback.
///
/// Tokens after a terminal callback are dropped and only the first terminal
/// callback is forwarded.
pub struct TerminalGuard {
    inner: Arc<dyn StreamCallback>,
    finished: AtomicBool,
}

impl TerminalGuard {
    pub fn wrap(inner: Arc<dyn StreamCallback>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            finished: AtomicBool::new(false),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }
}

impl StreamCallback for TerminalGuard {
    fn on_token(&self, token: &str) {
        if !self.is_finished() {
            self.inner.on_token(token);
        }
    }

    fn on_complete(&self, response: ChatResponse) {
        if self.finish() {
            self.inner.on_complete(response);
        } else {
            tracing::debug!("Dropping duplicate terminal callback (complete)");
        }
    }

    fn on_error(&self, error: AdapterError) {
        if self.finish() {
            self.inner.on_error(error);
        } else {
            tracing::debug!(error = %error, "Dropping duplicate terminal callback (error)");
        }
    }
}

/// A streamed event, as delivered by [`ChannelCallback`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    Complete(ChatResponse),
    Error(AdapterError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

/// Bridges the callback contract onto a tokio channel.
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: StreamEvent) {
        // Receiver dropped means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl StreamCallback for ChannelCallback {
    fn on_token(&self, token: &str) {
        self.send(StreamEvent::Token(token.to_string()));
    }

    fn on_complete(&self, response: ChatResponse) {
        self.send(StreamEvent::Complete(response));
    }

    fn on_error(&self, error: AdapterError) {
        self.send(StreamEvent::Error(error));
    }
}
