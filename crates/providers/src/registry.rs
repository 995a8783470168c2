//! Adapter registry: maps model names to the adapter serving them.
//!
//! Shared process-wide and read far more often than written. All state sits
//! behind one lock so a reader never observes an adapter without its model
//! mappings (or the reverse).

use crate::deepseek::DeepSeekAdapter;
use crate::qwen::QwenAdapter;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use modelgate_config::{AppConfig, DEEPSEEK, QWEN};
use modelgate_core::adapter::ModelAdapter;
use modelgate_core::error::RegistryError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

#[derive(Default)]
struct RegistryState {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
    /// Adapter names in registration order.
    order: Vec<String>,
    /// Exact model name → adapter name.
    model_index: HashMap<String, String>,
}

impl RegistryState {
    /// Remove `adapter`'s index entries, handing each freed model back to the
    /// latest-registered remaining adapter that lists it.
    fn drop_mappings_of(&mut self, adapter: &str) {
        let mut freed = Vec::new();
        self.model_index.retain(|model, owner| {
            let keep = owner != adapter;
            if !keep {
                freed.push(model.clone());
            }
            keep
        });
        if freed.is_empty() {
            return;
        }

        let mut reclaimed = Vec::new();
        for name in self.order.iter().filter(|n| n.as_str() != adapter) {
            let Some(other) = self.adapters.get(name) else {
                continue;
            };
            for model in other.supported_models() {
                if freed.contains(&model) {
                    reclaimed.push((model, name.clone()));
                }
            }
        }
        // Replayed in registration order, so the later claim wins
        for (model, owner) in reclaimed {
            debug!(model = %model, adapter = %owner, "Re-indexing shadowed model");
            self.model_index.insert(model, owner);
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn ModelAdapter>> {
        self.order.iter().filter_map(|name| self.adapters.get(name))
    }
}

/// Thread-safe registry of model adapters.
#[derive(Default)]
pub struct AdapterRegistry {
    state: RwLock<RegistryState>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an adapter under its name, indexing every model it lists.
    ///
    /// Re-registering a name replaces the previous adapter and its mappings.
    /// When two adapters list the same model, the later registration wins.
    pub fn register(&self, adapter: Arc<dyn ModelAdapter>) -> Result<(), RegistryError> {
        let name = adapter.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "Adapter name cannot be empty".into(),
            ));
        }

        let models = adapter.supported_models();
        let mut state = self.write();

        if state.adapters.contains_key(&name) {
            debug!(adapter = %name, "Replacing registered adapter");
            state.drop_mappings_of(&name);
        } else {
            state.order.push(name.clone());
        }

        for model in &models {
            state.model_index.insert(model.clone(), name.clone());
        }
        state.adapters.insert(name.clone(), adapter);

        info!(adapter = %name, models = models.len(), "Registered adapter");
        Ok(())
    }

    /// Remove an adapter and its model mappings. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        let mut state = self.write();
        if state.adapters.remove(name).is_some() {
            state.order.retain(|n| n != name);
            state.drop_mappings_of(name);
            info!(adapter = %name, "Unregistered adapter");
        }
    }

    /// Resolve the adapter serving `model`.
    ///
    /// Exact index match first, then the first registered adapter whose
    /// `supports` accepts the name.
    pub fn get_adapter(&self, model: &str) -> Option<Arc<dyn ModelAdapter>> {
        if model.is_empty() {
            return None;
        }

        let state = self.read();
        if let Some(adapter) = state
            .model_index
            .get(model)
            .and_then(|name| state.adapters.get(name))
        {
            return Some(adapter.clone());
        }

        state.ordered().find(|a| a.supports(model)).cloned()
    }

    pub fn get_adapter_by_name(&self, name: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.read().adapters.get(name).cloned()
    }

    /// Registered adapters that report themselves available, in
    /// registration order.
    pub fn get_available_adapters(&self) -> Vec<Arc<dyn ModelAdapter>> {
        self.read()
            .ordered()
            .filter(|a| a.is_available())
            .cloned()
            .collect()
    }

    pub fn get_all_adapters(&self) -> Vec<Arc<dyn ModelAdapter>> {
        self.read().ordered().cloned().collect()
    }

    /// Every exactly-indexed model name, grouped by adapter in registration
    /// order.
    pub fn get_supported_models(&self) -> Vec<String> {
        let state = self.read();
        let mut models = Vec::with_capacity(state.model_index.len());
        for name in &state.order {
            let Some(adapter) = state.adapters.get(name) else {
                continue;
            };
            for model in adapter.supported_models() {
                if state.model_index.get(&model) == Some(name) && !models.contains(&model) {
                    models.push(model);
                }
            }
        }
        models
    }

    /// Whether any adapter can serve `model` (exactly or by prefix).
    pub fn is_model_supported(&self, model: &str) -> bool {
        self.get_adapter(model).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().adapters.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.write();
        *state = RegistryState::default();
        info!("Cleared adapter registry");
    }
}

/// Build a registry with the DeepSeek and Qwen adapters from configuration.
///
/// Both adapters are always registered; one without an API key simply
/// reports itself unavailable.
pub fn build_from_config(config: &AppConfig, transport: Arc<dyn Transport>) -> AdapterRegistry {
    let registry = AdapterRegistry::new();
    let retry = RetryPolicy::from_config(&config.retry);

    let deepseek_cfg = config.provider(DEEPSEEK).cloned().unwrap_or_default();
    let mut deepseek = DeepSeekAdapter::new(
        deepseek_cfg.api_key.unwrap_or_default(),
        transport.clone(),
    )
    .with_models(deepseek_cfg.models)
    .with_retry_policy(retry.clone());
    if let Some(url) = deepseek_cfg.api_url {
        deepseek = deepseek.with_base_url(url);
    }
    if let Some(model) = deepseek_cfg.embedding_model {
        deepseek = deepseek.with_embedding_model(model);
    }

    let qwen_cfg = config.provider(QWEN).cloned().unwrap_or_default();
    let mut qwen = QwenAdapter::new(qwen_cfg.api_key.unwrap_or_default(), transport)
        .with_models(qwen_cfg.models)
        .with_retry_policy(retry);
    if let Some(url) = qwen_cfg.api_url {
        qwen = qwen.with_base_url(url);
    }
    if let Some(model) = qwen_cfg.embedding_model {
        qwen = qwen.with_embedding_model(model);
    }

    // Names are non-empty constants, registration cannot fail
    let _ = registry.register(Arc::new(deepseek));
    let _ = registry.register(Arc::new(qwen));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use async_trait::async_trait;
    use modelgate_config::ProviderConfig;
    use modelgate_core::error::AdapterError;
    use modelgate_core::request::ChatRequest;
    use modelgate_core::response::ChatResponse;

    struct StubAdapter {
        name: String,
        models: Vec<String>,
        prefix: Option<String>,
        available: bool,
    }

    impl StubAdapter {
        fn new(name: &str, models: &[&str]) -> Self {
            Self {
                name: name.into(),
                models: models.iter().map(|m| m.to_string()).collect(),
                prefix: None,
                available: true,
            }
        }

        fn with_prefix(mut self, prefix: &str) -> Self {
            self.prefix = Some(prefix.into());
            self
        }

        fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }
    }

    #[async_trait]
    impl ModelAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn supports(&self, model: &str) -> bool {
            self.models.iter().any(|m| m == model)
                || self.prefix.as_deref().is_some_and(|p| model.starts_with(p))
        }
        fn supported_models(&self) -> Vec<String> {
            self.models.clone()
        }
        fn is_available(&self) -> bool {
            self.available
        }
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, AdapterError> {
            Err(AdapterError::NotConfigured("stub".into()))
        }
    }

    #[test]
    fn register_and_exact_lookup() {
        let registry = AdapterRegistry::new();
        registry
            .register(Arc::new(StubAdapter::new("DeepSeek", &["deepseek-chat", "deepseek-coder"])))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_adapter("deepseek-coder").unwrap().name(), "DeepSeek");
        assert!(registry.get_adapter("gpt-4").is_none());
        assert!(registry.get_adapter("").is_none());
        assert_eq!(
            registry.get_supported_models(),
            vec!["deepseek-chat", "deepseek-coder"]
        );
    }

    #[test]
    fn falls_back_to_supports_scan() {
        let registry = AdapterRegistry::new();
        registry
            .register(Arc::new(
                StubAdapter::new("Qwen", &["qwen-max", "qwen-plus"]).with_prefix("qwen-"),
            ))
            .unwrap();

        let adapter = registry.get_adapter("qwen-turbo").unwrap();
        assert_eq!(adapter.name(), "Qwen");
        assert!(registry.is_model_supported("qwen-turbo"));
        // Scan hits are not added to the exact index
        assert!(!registry.get_supported_models().contains(&"qwen-turbo".to_string()));
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = AdapterRegistry::new();
        let err = registry
            .register(Arc::new(StubAdapter::new("", &["m"])))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistration_replaces_mappings() {
        let registry = AdapterRegistry::new();
        registry
            .register(Arc::new(StubAdapter::new("A", &["m1", "m2"])))
            .unwrap();
        registry
            .register(Arc::new(StubAdapter::new("A", &["m3"])))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get_adapter("m1").is_none());
        assert_eq!(registry.get_adapter("m3").unwrap().name(), "A");
        assert_eq!(registry.get_supported_models(), vec!["m3"]);
    }

    #[test]
    fn later_registration_wins_shared_model() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["shared"]))).unwrap();
        registry.register(Arc::new(StubAdapter::new("B", &["shared"]))).unwrap();
        assert_eq!(registry.get_adapter("shared").unwrap().name(), "B");

        // Removing the loser keeps the winner's mapping
        registry.unregister("A");
        assert_eq!(registry.get_adapter("shared").unwrap().name(), "B");
    }

    #[test]
    fn unregistering_winner_restores_shadowed_claim() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["shared", "a-only"]))).unwrap();
        registry.register(Arc::new(StubAdapter::new("B", &["shared"]))).unwrap();
        registry.register(Arc::new(StubAdapter::new("C", &["shared"]))).unwrap();

        registry.unregister("C");
        assert_eq!(registry.get_adapter("shared").unwrap().name(), "B");

        registry.unregister("B");
        assert_eq!(registry.get_adapter("shared").unwrap().name(), "A");
        assert_eq!(registry.get_supported_models(), vec!["shared", "a-only"]);
    }

    #[test]
    fn reregistering_without_shared_model_hands_it_back() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["shared"]))).unwrap();
        registry.register(Arc::new(StubAdapter::new("B", &["shared", "b1"]))).unwrap();

        registry.register(Arc::new(StubAdapter::new("B", &["b1"]))).unwrap();
        assert_eq!(registry.get_adapter("shared").unwrap().name(), "A");
        assert_eq!(registry.get_supported_models(), vec!["shared", "b1"]);
    }

    #[test]
    fn unregister_removes_mappings_and_ignores_unknown() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["m1"]))).unwrap();
        registry.unregister("nope");
        assert_eq!(registry.len(), 1);

        registry.unregister("A");
        assert!(registry.is_empty());
        assert!(registry.get_adapter("m1").is_none());
        assert!(registry.get_adapter_by_name("A").is_none());
    }

    #[test]
    fn available_adapters_filtered_in_order() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["a"]))).unwrap();
        registry
            .register(Arc::new(StubAdapter::new("B", &["b"]).unavailable()))
            .unwrap();
        registry.register(Arc::new(StubAdapter::new("C", &["c"]))).unwrap();

        let names: Vec<String> = registry
            .get_available_adapters()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(registry.get_all_adapters().len(), 3);
    }

    #[test]
    fn clear_empties_everything() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new("A", &["a"]))).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get_supported_models().is_empty());
    }

    #[test]
    fn concurrent_readers_see_complete_registrations() {
        let registry = Arc::new(AdapterRegistry::new());
        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let name = format!("adapter-{i}");
                    let model = format!("model-{i}");
                    registry
                        .register(Arc::new(StubAdapter::new(&name, &[model.as_str()])))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        for model in registry.get_supported_models() {
                            // Every indexed model resolves to a live adapter
                            assert!(registry.get_adapter(&model).is_some());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn build_from_config_registers_both_adapters() {
        let mut config = AppConfig::default();
        config.providers.insert(
            QWEN.into(),
            ProviderConfig {
                api_key: Some("dash".into()),
                models: vec!["qwen-max".into(), "qwen-plus".into()],
                ..ProviderConfig::default()
            },
        );

        let registry = build_from_config(&config, Arc::new(ScriptedTransport::default()));
        assert_eq!(registry.len(), 2);
        assert!(!registry.get_adapter_by_name("DeepSeek").unwrap().is_available());
        assert!(registry.get_adapter_by_name("Qwen").unwrap().is_available());
        assert_eq!(registry.get_adapter("qwen-turbo").unwrap().name(), "Qwen");
        assert_eq!(
            registry.get_supported_models(),
            vec!["deepseek-chat", "deepseek-coder", "qwen-max", "qwen-plus"]
        );
    }
}
