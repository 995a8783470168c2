//! HTTP transport seam.
//!
//! Adapters build provider-specific JSON bodies and hand them to a
//! [`Transport`]. The production implementation is [`ReqwestTransport`];
//! tests substitute scripted transports.

use async_trait::async_trait;
use futures::StreamExt;
use modelgate_core::error::AdapterError;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Request headers as `(name, value)` pairs.
pub type Headers = [(&'static str, String)];

/// Receiver of SSE `data:` payloads, in arrival order.
pub type SseReceiver = mpsc::Receiver<Result<String, AdapterError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` as JSON and return the parsed JSON answer.
    async fn post_json(&self, url: &str, headers: &Headers, body: &Value)
    -> Result<Value, AdapterError>;

    /// POST `body` as JSON and stream back the server-sent event payloads.
    ///
    /// Fails before returning the receiver when the server rejects the
    /// request; later failures arrive on the channel.
    async fn post_sse(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<SseReceiver, AdapterError>;
}

/// Wait assumed when a 429 carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Map a non-success HTTP status to an adapter error.
///
/// `retry_after` is the provider's `Retry-After` value in seconds, if any.
pub fn status_error(status: u16, retry_after: Option<u64>, body: String) -> AdapterError {
    match status {
        429 => AdapterError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        503 => AdapterError::ServiceUnavailable(body),
        401 | 403 => {
            AdapterError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        _ => AdapterError::Api {
            status_code: status,
            message: body,
        },
    }
}

/// `Retry-After` in its delta-seconds form. HTTP-date values are ignored.
fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn send_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout(e.to_string())
    } else {
        AdapterError::Connection(e.to_string())
    }
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<reqwest::Response, AdapterError> {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }

        let response = builder.json(body).send().await.map_err(send_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, url, ?retry_after, body = %error_body, "Provider returned error");
            return Err(status_error(status, retry_after, error_body));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Value, AdapterError> {
        debug!(url, "POST");
        let response = self.send(url, headers, body).await?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse response: {e}")))
    }

    async fn post_sse(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<SseReceiver, AdapterError> {
        debug!(url, "POST (stream)");
        let response = self.send(url, headers, body).await?;

        let (tx, rx) = mpsc::channel(64);

        // Read the byte stream on its own task; payloads are forwarded as
        // soon as a full line is buffered.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AdapterError::Connection(format!(
                                "stream interrupted: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    if tx.send(Ok(data)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            if let Some(data) = lines.finish() {
                let _ = tx.send(Ok(data)).await;
            }
        });

        Ok(rx)
    }
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Bytes are held raw until a `\n` completes the line, so a multi-byte
/// character split across network chunks decodes intact. Comment lines,
/// blank lines and non-data fields (`id:`, `event:`) are skipped. Both
/// `data: x` and `data:x` are accepted.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed raw bytes; returns the payloads of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(data) = Self::data_of(&line[..line_end]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::data_of(&rest)
    }

    fn data_of(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        Self::data_field(line.trim_end_matches('\r'))
    }

    fn data_field(line: &str) -> Option<String> {
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        line.strip_prefix("data:")
            .map(|data| data.trim().to_string())
            .filter(|data| !data.is_empty())
    }
}
