use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::config::{AiConfig, ProviderId, ProviderSettings};
use super::contract::ProviderContract;
use crate::errors::{AiError, Result};

/// Maps provider identifiers to live [`ProviderContract`] instances.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderId, Arc<dyn ProviderContract>>>,
    settings: RwLock<HashMap<ProviderId, ProviderSettings>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose default settings come from `config` rather than the seed table.
    pub fn with_config(config: &AiConfig) -> Self {
        let registry = Self::new();
        {
            let mut settings = registry
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for entry in &config.providers {
                settings.insert(entry.id.clone(), entry.clone());
            }
        }
        registry
    }

    /// Bind `provider` under its own id. A later registration for the same id wins.
    pub fn register(&self, provider: Arc<dyn ProviderContract>) {
        let id = provider.id();
        log::debug!("registering AI provider {id}");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, provider);
    }

    pub fn get(&self, id: &ProviderId) -> Result<Arc<dyn ProviderContract>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| AiError::ProviderNotRegistered(id.clone()))
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default configuration (model, token budget, temperature, capabilities) for `id`.
    pub fn settings(&self, id: &ProviderId) -> ProviderSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_else(|| ProviderSettings::defaults_for(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[test]
    fn unregistered_provider_is_reported() {
        let registry = ProviderRegistry::new();
        let err = registry.get(&ProviderId::OpenAi).err().unwrap();
        assert!(matches!(err, AiError::ProviderNotRegistered(ProviderId::OpenAi)));
        assert!(registry.is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::fixed("stub", "first")));
        registry.register(Arc::new(ScriptedProvider::fixed("stub", "second")));
        registry.register(Arc::new(ScriptedProvider::fixed("alpha", "a")));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.ids(),
            vec![ProviderId::from("alpha"), ProviderId::from("stub")]
        );
        let provider = registry.get(&ProviderId::from("stub")).unwrap();
        let response = futures::executor::block_on(provider.send(&[], None)).unwrap();
        assert_eq!(response.content, "second");
    }

    #[test]
    fn settings_fall_back_to_seed_defaults() {
        let mut config = AiConfig::default();
        config.providers.retain(|p| p.id != ProviderId::OpenAi);
        if let Some(gemini) = config.providers.iter_mut().find(|p| p.id == ProviderId::Gemini) {
            gemini.model = "gemini-1.5-flash".into();
        }
        let registry = ProviderRegistry::with_config(&config);
        assert_eq!(registry.settings(&ProviderId::Gemini).model, "gemini-1.5-flash");
        assert_eq!(registry.settings(&ProviderId::OpenAi).model, "gpt-4-turbo-preview");
    }
}
