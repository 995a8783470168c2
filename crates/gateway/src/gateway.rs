//! The caller-facing LLM gateway.
//!
//! Picks a model for every call (request → preferred → first registered),
//! routes it through the [`AdapterRegistry`], and walks the fallback chain
//! when the primary model fails.

use modelgate_config::AppConfig;
use modelgate_core::adapter::{ModelAdapter, ModelInfo};
use modelgate_core::error::{AdapterError, GatewayError};
use modelgate_core::message::Message;
use modelgate_core::request::ChatRequest;
use modelgate_core::response::ChatResponse;
use modelgate_core::stream::{StreamCallback, TerminalGuard};
use modelgate_providers::AdapterRegistry;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Temperature used for code completion.
pub const COMPLETION_TEMPERATURE: f32 = 0.2;

const COMPLETION_MARKER: &str = "[COMPLETE HERE]";

/// Runtime-adjustable routing settings.
#[derive(Debug, Clone)]
pub struct RoutingOptions {
    pub preferred_model: Option<String>,
    pub fallback_models: Vec<String>,
    pub enable_fallback: bool,
    /// Used by `complete` when no preferred model is set
    pub default_completion_model: String,
    /// Used by `embed` when no preferred model is set
    pub default_embedding_model: String,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RoutingOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut fallback_models = Vec::new();
        for model in &config.fallback_models {
            if !fallback_models.contains(model) {
                fallback_models.push(model.clone());
            }
        }

        Self {
            preferred_model: config.preferred_model.clone().filter(|m| !m.is_empty()),
            fallback_models,
            enable_fallback: config.enable_fallback,
            default_completion_model: config.default_completion_model.clone(),
            default_embedding_model: config.default_embedding_model.clone(),
        }
    }
}

/// Routes chat, streaming, completion and embedding calls onto adapters.
pub struct LlmGateway {
    registry: Arc<AdapterRegistry>,
    routing: RwLock<RoutingOptions>,
}

impl LlmGateway {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self::with_options(registry, RoutingOptions::default())
    }

    pub fn with_options(registry: Arc<AdapterRegistry>, options: RoutingOptions) -> Self {
        Self {
            registry,
            routing: RwLock::new(options),
        }
    }

    pub fn from_config(registry: Arc<AdapterRegistry>, config: &AppConfig) -> Self {
        Self::with_options(registry, RoutingOptions::from_config(config))
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Point-in-time copy of the routing settings.
    ///
    /// Each call works from one snapshot; concurrent reconfiguration only
    /// affects later calls.
    pub fn routing(&self) -> RoutingOptions {
        self.routing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_routing(&self, f: impl FnOnce(&mut RoutingOptions)) {
        let mut routing = self
            .routing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut routing);
    }

    /// Model-selection precedence: request, preferred, first registered.
    fn resolve_model(
        &self,
        requested: Option<&str>,
        routing: &RoutingOptions,
    ) -> Result<String, GatewayError> {
        if let Some(model) = requested.filter(|m| !m.is_empty()) {
            return Ok(model.to_string());
        }
        if let Some(model) = routing.preferred_model.as_deref().filter(|m| !m.is_empty()) {
            return Ok(model.to_string());
        }
        self.registry
            .get_supported_models()
            .into_iter()
            .next()
            .ok_or(GatewayError::NoModelAvailable)
    }

    /// Send a chat request, falling back through the configured chain.
    ///
    /// On success the request's `model` is stamped with the model that
    /// actually answered.
    pub async fn chat(&self, request: &mut ChatRequest) -> Result<ChatResponse, GatewayError> {
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidArgument("Messages cannot be empty".into()));
        }

        let routing = self.routing();
        let primary = self.resolve_model(request.requested_model(), &routing)?;

        if self.registry.get_adapter(&primary).is_none() {
            return Err(GatewayError::NoAdapter { model: primary });
        }

        let mut candidates = vec![primary];
        if routing.enable_fallback {
            for model in routing.fallback_models {
                if !candidates.contains(&model) {
                    candidates.push(model);
                }
            }
        }

        let total = candidates.len();
        let mut last_error: Option<AdapterError> = None;

        for (i, model) in candidates.iter().enumerate() {
            let Some(adapter) = self.registry.get_adapter(model) else {
                warn!(model = %model, "No adapter for model, skipping");
                continue;
            };
            if !adapter.is_available() {
                warn!(model = %model, adapter = %adapter.name(), "Adapter unavailable, skipping");
                continue;
            }

            info!(
                model = %model,
                adapter = %adapter.name(),
                attempt = i + 1,
                total,
                "Routing chat request"
            );

            let mut attempt = request.clone();
            attempt.model = Some(model.clone());

            match adapter.chat(attempt).await {
                Ok(response) => {
                    if i > 0 {
                        info!(model = %model, "Fallback model succeeded");
                    }
                    request.model = Some(model.clone());
                    return Ok(response);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Model failed, trying next candidate");
                    last_error = Some(e);
                }
            }
        }

        Err(GatewayError::AllModelsFailed {
            tried: candidates,
            source: last_error,
        })
    }

    /// Stream a chat response into `callback`. No fallback.
    ///
    /// Every failure, including routing failures, is reported through
    /// `on_error`; the callback always receives exactly one terminal call.
    pub async fn chat_stream(&self, mut request: ChatRequest, callback: Arc<dyn StreamCallback>) {
        let guard = TerminalGuard::wrap(callback);

        if request.messages.is_empty() {
            guard.on_error(AdapterError::InvalidRequest("Messages cannot be empty".into()));
            return;
        }

        let routing = self.routing();
        let model = match self.resolve_model(request.requested_model(), &routing) {
            Ok(model) => model,
            Err(e) => {
                guard.on_error(AdapterError::NotConfigured(e.to_string()));
                return;
            }
        };

        let Some(adapter) = self.registry.get_adapter(&model) else {
            guard.on_error(AdapterError::NotConfigured(format!(
                "No adapter available for model: {model}"
            )));
            return;
        };
        if !adapter.is_available() {
            guard.on_error(AdapterError::NotConfigured(format!(
                "Adapter not available: {}",
                adapter.name()
            )));
            return;
        }

        debug!(model = %model, adapter = %adapter.name(), "Routing streaming request");
        request.model = Some(model);
        adapter.chat_stream(request, guard.clone()).await;

        if !guard.is_finished() {
            guard.on_error(AdapterError::Connection(
                "stream ended without a terminal event".into(),
            ));
        }
    }

    /// Code completion around a cursor.
    ///
    /// Returns only the text of the answer.
    pub async fn complete(
        &self,
        prefix: &str,
        suffix: Option<&str>,
        language: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, GatewayError> {
        let routing = self.routing();
        let model = routing
            .preferred_model
            .clone()
            .unwrap_or(routing.default_completion_model);

        let mut request = ChatRequest::new(vec![Message::user(completion_prompt(
            prefix, suffix, language,
        ))])
        .with_model(model)
        .with_temperature(COMPLETION_TEMPERATURE);
        request.max_tokens = max_tokens;

        let response = self.chat(&mut request).await?;
        Ok(response.content().to_string())
    }

    /// Embed each text with one adapter call per text.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Err(GatewayError::InvalidArgument("Texts cannot be empty".into()));
        }

        let adapter = self.embedding_adapter()?;
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(adapter.embed(text).await?);
        }
        Ok(embeddings)
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        if text.is_empty() {
            return Err(GatewayError::InvalidArgument("Text cannot be empty".into()));
        }
        let adapter = self.embedding_adapter()?;
        Ok(adapter.embed(text).await?)
    }

    fn embedding_adapter(&self) -> Result<Arc<dyn ModelAdapter>, GatewayError> {
        let routing = self.routing();
        let model = routing
            .preferred_model
            .unwrap_or(routing.default_embedding_model);
        self.registry
            .get_adapter(&model)
            .ok_or(GatewayError::NoAdapter { model })
    }

    /// Every model served by an available adapter.
    pub fn get_available_models(&self) -> Vec<ModelInfo> {
        self.registry
            .get_available_adapters()
            .iter()
            .flat_map(|adapter| {
                let available = adapter.is_available();
                adapter.supported_models().into_iter().map(move |model| ModelInfo {
                    available,
                    ..ModelInfo::chat(model, adapter.name())
                })
            })
            .collect()
    }

    pub fn set_preferred_model(&self, model: Option<String>) {
        let model = model.filter(|m| !m.is_empty());
        info!(model = ?model, "Preferred model changed");
        self.update_routing(|r| r.preferred_model = model);
    }

    pub fn get_preferred_model(&self) -> Option<String> {
        self.routing().preferred_model
    }

    /// Whether `model` resolves to an adapter that is currently available.
    pub fn is_model_available(&self, model: &str) -> bool {
        self.registry
            .get_adapter(model)
            .is_some_and(|adapter| adapter.is_available())
    }

    /// Append a fallback model; duplicates are ignored.
    pub fn add_fallback_model(&self, model: impl Into<String>) {
        let model = model.into();
        self.update_routing(|r| {
            if !r.fallback_models.contains(&model) {
                r.fallback_models.push(model);
            }
        });
    }

    pub fn set_enable_fallback(&self, enable: bool) {
        self.update_routing(|r| r.enable_fallback = enable);
    }
}

/// Prompt for code completion. The marker is only present with a suffix.
pub fn completion_prompt(prefix: &str, suffix: Option<&str>, language: &str) -> String {
    let mut prompt = format!("Complete the following {language} code:\n\n```{language}\n{prefix}");
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        prompt.push('\n');
        prompt.push_str(COMPLETION_MARKER);
        prompt.push('\n');
        prompt.push_str(suffix);
    }
    prompt.push_str("\n```\n\n");
    prompt.push_str(&format!(
        "Only provide the code to fill in {COMPLETION_MARKER}. Do not include explanations."
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockAdapter;
    use modelgate_core::stream::{ChannelCallback, StreamEvent};
    use modelgate_providers::RetryPolicy;
    use std::time::Duration;

    fn gateway_with(adapters: Vec<Arc<MockAdapter>>) -> LlmGateway {
        let registry = Arc::new(AdapterRegistry::new());
        for adapter in adapters {
            registry.register(adapter).unwrap();
        }
        LlmGateway::new(registry)
    }

    fn hello() -> ChatRequest {
        ChatRequest::new(vec![Message::user("hello")])
    }

    async fn drain(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn request_model_takes_precedence() {
        let a = MockAdapter::answering("A", &["a-1", "a-2"], "from A");
        let gateway = gateway_with(vec![a.clone()]);
        gateway.set_preferred_model(Some("a-1".into()));

        let mut request = hello().with_model("a-2");
        gateway.chat(&mut request).await.unwrap();
        assert_eq!(a.seen_models(), vec!["a-2"]);
    }

    #[tokio::test]
    async fn preferred_then_first_registered_model() {
        let a = MockAdapter::answering("A", &["a-1"], "from A");
        let b = MockAdapter::answering("B", &["b-1"], "from B");
        let gateway = gateway_with(vec![a.clone(), b.clone()]);

        let mut request = hello();
        let response = gateway.chat(&mut request).await.unwrap();
        assert_eq!(response.content(), "from A");
        assert_eq!(request.model.as_deref(), Some("a-1"));

        gateway.set_preferred_model(Some("b-1".into()));
        let mut request = hello();
        let response = gateway.chat(&mut request).await.unwrap();
        assert_eq!(response.content(), "from B");
        assert_eq!(request.model.as_deref(), Some("b-1"));
    }

    #[tokio::test]
    async fn empty_registry_has_no_model() {
        let gateway = gateway_with(vec![]);
        let err = gateway.chat(&mut hello()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoModelAvailable));
    }

    #[tokio::test]
    async fn empty_messages_rejected() {
        let gateway = gateway_with(vec![MockAdapter::answering("A", &["a-1"], "x")]);
        let err = gateway.chat(&mut ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unknown_primary_model_is_no_adapter() {
        let gateway = gateway_with(vec![MockAdapter::answering("A", &["a-1"], "x")]);
        let err = gateway
            .chat(&mut hello().with_model("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoAdapter { model } if model == "gpt-4"));
    }

    #[tokio::test]
    async fn fallback_answers_and_is_stamped() {
        let primary = MockAdapter::failing("P", &["p-1"], AdapterError::Timeout("slow".into()));
        let fallback = MockAdapter::answering("F", &["f-1"], "from fallback");
        let gateway = gateway_with(vec![primary.clone(), fallback.clone()]);
        gateway.add_fallback_model("f-1");

        let mut request = hello().with_model("p-1");
        let response = gateway.chat(&mut request).await.unwrap();

        assert_eq!(response.content(), "from fallback");
        assert_eq!(request.model.as_deref(), Some("f-1"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.seen_models(), vec!["f-1"]);
    }

    #[tokio::test]
    async fn disabled_fallback_surfaces_primary_failure() {
        let primary = MockAdapter::failing("P", &["p-1"], AdapterError::Timeout("slow".into()));
        let fallback = MockAdapter::answering("F", &["f-1"], "from fallback");
        let gateway = gateway_with(vec![primary, fallback.clone()]);
        gateway.add_fallback_model("f-1");
        gateway.set_enable_fallback(false);

        let mut request = hello().with_model("p-1");
        let err = gateway.chat(&mut request).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllModelsFailed { ref tried, .. } if tried == &["p-1"]));
        assert_eq!(fallback.calls(), 0);
        // Unstamped on failure
        assert_eq!(request.model.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn all_models_failed_carries_last_cause() {
        let p = MockAdapter::failing("P", &["p-1"], AdapterError::Timeout("slow".into()));
        let f = MockAdapter::failing(
            "F",
            &["f-1"],
            AdapterError::AuthenticationFailed("bad key".into()),
        );
        let gateway = gateway_with(vec![p, f]);
        gateway.add_fallback_model("f-1");

        let err = gateway.chat(&mut hello().with_model("p-1")).await.unwrap_err();
        match err {
            GatewayError::AllModelsFailed { tried, source } => {
                assert_eq!(tried, vec!["p-1", "f-1"]);
                assert!(matches!(source, Some(AdapterError::AuthenticationFailed(_))));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn unavailable_and_unknown_fallbacks_are_skipped() {
        let primary = MockAdapter::failing("P", &["p-1"], AdapterError::Timeout("slow".into()));
        let offline = MockAdapter::answering("Off", &["off-1"], "never").unavailable();
        let good = MockAdapter::answering("G", &["g-1"], "good");
        let gateway = gateway_with(vec![primary, offline.clone(), good]);
        gateway.add_fallback_model("missing-model");
        gateway.add_fallback_model("off-1");
        gateway.add_fallback_model("g-1");
        gateway.add_fallback_model("g-1");

        assert_eq!(gateway.routing().fallback_models.len(), 3);

        let mut request = hello().with_model("p-1");
        let response = gateway.chat(&mut request).await.unwrap();
        assert_eq!(response.content(), "good");
        assert_eq!(offline.calls(), 0);
        assert_eq!(request.model.as_deref(), Some("g-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_retries_before_gateway_falls_back() {
        let primary = MockAdapter::failing("P", &["p-1"], AdapterError::ServiceUnavailable("busy".into()))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(100)));
        let fallback = MockAdapter::answering("F", &["f-1"], "rescued");
        let gateway = gateway_with(vec![primary.clone(), fallback]);
        gateway.add_fallback_model("f-1");

        let response = gateway.chat(&mut hello().with_model("p-1")).await.unwrap();
        assert_eq!(response.content(), "rescued");
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn stream_reports_missing_adapter() {
        let gateway = gateway_with(vec![MockAdapter::answering("A", &["a-1"], "x")]);
        let (callback, rx) = ChannelCallback::new();
        gateway
            .chat_stream(hello().with_model("nope"), Arc::new(callback))
            .await;

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.to_string().contains("nope")));
    }

    #[tokio::test]
    async fn stream_reports_unavailable_adapter_without_fallback() {
        let offline = MockAdapter::answering("Off", &["off-1"], "x").unavailable();
        let good = MockAdapter::answering("G", &["g-1"], "good");
        let gateway = gateway_with(vec![offline, good.clone()]);
        gateway.add_fallback_model("g-1");

        let (callback, rx) = ChannelCallback::new();
        gateway
            .chat_stream(hello().with_model("off-1"), Arc::new(callback))
            .await;

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.to_string().contains("Off")));
        assert_eq!(good.calls(), 0);
    }

    #[tokio::test]
    async fn stream_delegates_with_resolved_model() {
        let a = MockAdapter::answering("A", &["a-1"], "streamed");
        let gateway = gateway_with(vec![a.clone()]);

        let (callback, rx) = ChannelCallback::new();
        gateway.chat_stream(hello(), Arc::new(callback)).await;

        let events = drain(rx).await;
        assert!(matches!(&events[0], StreamEvent::Token(t) if t == "streamed"));
        assert!(matches!(&events[1], StreamEvent::Complete(_)));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(a.seen_models(), vec!["a-1"]);
    }

    #[tokio::test]
    async fn stream_guard_closes_silent_adapter() {
        let silent = MockAdapter::answering("S", &["s-1"], "x").silent_stream();
        let gateway = gateway_with(vec![silent]);

        let (callback, rx) = ChannelCallback::new();
        gateway.chat_stream(hello(), Arc::new(callback)).await;

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(_)));
    }

    #[tokio::test]
    async fn complete_builds_marked_prompt() {
        let coder = MockAdapter::answering("DeepSeek", &["deepseek-coder"], "    x + 1");
        let gateway = gateway_with(vec![coder.clone()]);

        let text = gateway
            .complete("fn inc(x: i32) -> i32 {", Some("}"), "rust", Some(64))
            .await
            .unwrap();
        assert_eq!(text, "    x + 1");

        let request = coder.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("deepseek-coder"));
        assert_eq!(request.temperature, Some(COMPLETION_TEMPERATURE));
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(
            request.messages[0].content,
            "Complete the following rust code:\n\n```rust\nfn inc(x: i32) -> i32 {\n[COMPLETE HERE]\n}\n```\n\nOnly provide the code to fill in [COMPLETE HERE]. Do not include explanations."
        );
    }

    #[test]
    fn completion_prompt_without_suffix_has_no_inline_marker() {
        let prompt = completion_prompt("let x = ", None, "rust");
        assert!(prompt.starts_with("Complete the following rust code:\n\n```rust\nlet x = \n```"));
        assert_eq!(prompt.matches(COMPLETION_MARKER).count(), 1);
        assert_eq!(completion_prompt("a", Some(""), "go"), completion_prompt("a", None, "go"));
    }

    #[tokio::test]
    async fn complete_uses_preferred_model() {
        let a = MockAdapter::answering("A", &["a-1"], "done");
        let gateway = gateway_with(vec![a.clone()]);
        gateway.set_preferred_model(Some("a-1".into()));
        gateway.complete("x", None, "python", None).await.unwrap();
        assert_eq!(a.seen_models(), vec!["a-1"]);
    }

    #[tokio::test]
    async fn embed_issues_one_call_per_text() {
        let embedder = MockAdapter::answering("DeepSeek", &["deepseek-chat"], "x");
        let gateway = gateway_with(vec![embedder.clone()]);

        let vectors = gateway
            .embed(&["a".to_string(), "bb".to_string(), "ccc".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[2], vec![3.0]);
        assert_eq!(embedder.embed_calls(), 3);

        let single = gateway.embed_single("dddd").await.unwrap();
        assert_eq!(single, vec![4.0]);
    }

    #[tokio::test]
    async fn embed_validates_and_routes() {
        let gateway = gateway_with(vec![MockAdapter::answering("A", &["a-1"], "x")]);
        assert!(matches!(
            gateway.embed(&[]).await.unwrap_err(),
            GatewayError::InvalidArgument(_)
        ));
        assert!(matches!(
            gateway.embed_single("").await.unwrap_err(),
            GatewayError::InvalidArgument(_)
        ));
        // Default embedding model is not registered here
        assert!(matches!(
            gateway.embed_single("text").await.unwrap_err(),
            GatewayError::NoAdapter { .. }
        ));
    }

    #[test]
    fn available_models_list_available_adapters_only() {
        let gateway = gateway_with(vec![
            MockAdapter::answering("A", &["a-1", "a-2"], "x"),
            MockAdapter::answering("Off", &["off-1"], "x").unavailable(),
        ]);

        let models = gateway.get_available_models();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a-1", "a-2"]);
        assert!(models.iter().all(|m| m.available && m.provider == "A"));

        assert!(gateway.is_model_available("a-1"));
        assert!(!gateway.is_model_available("off-1"));
        assert!(!gateway.is_model_available("zzz"));
    }

    #[test]
    fn preferred_model_round_trip() {
        let gateway = gateway_with(vec![]);
        assert!(gateway.get_preferred_model().is_none());
        gateway.set_preferred_model(Some("qwen-max".into()));
        assert_eq!(gateway.get_preferred_model().as_deref(), Some("qwen-max"));
        gateway.set_preferred_model(Some(String::new()));
        assert!(gateway.get_preferred_model().is_none());
    }

    #[test]
    fn routing_from_config_dedupes_fallbacks() {
        let config = AppConfig {
            preferred_model: Some("qwen-max".into()),
            fallback_models: vec!["a".into(), "b".into(), "a".into()],
            enable_fallback: false,
            ..AppConfig::default()
        };
        let options = RoutingOptions::from_config(&config);
        assert_eq!(options.fallback_models, vec!["a", "b"]);
        assert!(!options.enable_fallback);
        assert_eq!(options.default_completion_model, "deepseek-coder");
        assert_eq!(options.default_embedding_model, "deepseek-chat");
    }
}
