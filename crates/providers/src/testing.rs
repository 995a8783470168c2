//! Scripted transport for adapter tests.

use crate::transport::{Headers, SseReceiver, Transport};
use async_trait::async_trait;
use modelgate_core::error::AdapterError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub(crate) struct RecordedCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type SseScript = Result<Vec<Result<String, AdapterError>>, AdapterError>;

/// Replays queued answers in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    json: Mutex<VecDeque<Result<Value, AdapterError>>>,
    sse: Mutex<VecDeque<SseScript>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn push_json(&self, answer: Result<Value, AdapterError>) {
        self.json.lock().unwrap().push_back(answer);
    }

    pub fn push_sse(&self, answer: SseScript) {
        self.sse.lock().unwrap().push_back(answer);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn with_call<R>(&self, index: usize, f: impl FnOnce(&RecordedCall) -> R) -> R {
        f(&self.calls.lock().unwrap()[index])
    }

    fn record(&self, url: &str, headers: &Headers, body: &Value) {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
            body: body.clone(),
        });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Value, AdapterError> {
        self.record(url, headers, body);
        self.json
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AdapterError::Parse("no scripted answer".into())))
    }

    async fn post_sse(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<SseReceiver, AdapterError> {
        self.record(url, headers, body);
        let events = self
            .sse
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AdapterError::Parse("no scripted stream".into())))?;

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }
}
