//! Provider type registry: type id → metadata + factory.
//!
//! One registry exists per capability ([`LlmProviderRegistry`], [`TtsProviderRegistry`]).
//! Registries are plain values built at startup and handed to whoever needs them; there is
//! no global instance.
//!
//! ```rust
//! use petagent::clients::register_builtin_llm_providers;
//! use petagent::provider::{Provider, ProviderConfig};
//! use petagent::provider_registry::LlmProviderRegistry;
//!
//! let mut registry = LlmProviderRegistry::new();
//! register_builtin_llm_providers(&mut registry);
//!
//! let provider = registry
//!     .create("openai", ProviderConfig::new("openai").with_api_key("sk-test"))
//!     .expect("openai is built in");
//! assert_eq!(provider.metadata().id, "openai");
//! assert!(registry.create("nope", ProviderConfig::new("nope")).is_none());
//! ```

use crate::provider::{LlmProvider, ProviderConfig, ProviderMetadata, TtsProvider};
use std::sync::Arc;

/// Builds a provider from its effective configuration.
pub type ProviderFactory<P> = Arc<dyn Fn(ProviderConfig) -> Arc<P> + Send + Sync>;

pub struct ProviderRegistry<P: ?Sized> {
    entries: Vec<(ProviderMetadata, ProviderFactory<P>)>,
}

pub type LlmProviderRegistry = ProviderRegistry<dyn LlmProvider>;
pub type TtsProviderRegistry = ProviderRegistry<dyn TtsProvider>;

impl<P: ?Sized> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a provider type. Registering an id again replaces the earlier entry in place.
    pub fn register<F>(&mut self, metadata: ProviderMetadata, factory: F)
    where
        F: Fn(ProviderConfig) -> Arc<P> + Send + Sync + 'static,
    {
        let factory: ProviderFactory<P> = Arc::new(factory);
        match self.entries.iter_mut().find(|(m, _)| m.id == metadata.id) {
            Some(entry) => {
                log::debug!("ProviderRegistry::register(...): replacing '{}'", metadata.id);
                *entry = (metadata, factory);
            }
            None => self.entries.push((metadata, factory)),
        }
    }

    /// Build a provider of type `type_id`, or `None` if the type is unknown.
    ///
    /// Missing or invalid configuration values are replaced by the declared defaults before
    /// the factory runs.
    pub fn create(&self, type_id: &str, config: ProviderConfig) -> Option<Arc<P>> {
        let (metadata, factory) = self.entries.iter().find(|(m, _)| m.id == type_id)?;
        let mut config = config.with_defaults(metadata);
        config.id = metadata.id.clone();
        Some(factory(config))
    }

    /// Metadata of every registered type, in registration order.
    pub fn get_all(&self) -> Vec<ProviderMetadata> {
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn metadata(&self, type_id: &str) -> Option<&ProviderMetadata> {
        self.entries
            .iter()
            .map(|(m, _)| m)
            .find(|m| m.id == type_id)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.metadata(type_id).is_some()
    }
}

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        ConfigField, ConfigFieldType, Provider, ProviderError, ProviderTestResult, SynthesisRequest,
        SynthesisResponse,
    };
    use async_trait::async_trait;

    struct Beep {
        metadata: ProviderMetadata,
        config: ProviderConfig,
    }

    #[async_trait]
    impl Provider for Beep {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn terminate(&self) {}
        async fn test(&self) -> ProviderTestResult {
            ProviderTestResult::ok(None)
        }
    }

    #[async_trait]
    impl TtsProvider for Beep {
        async fn synthesize(
            &self,
            _request: SynthesisRequest,
        ) -> Result<SynthesisResponse, ProviderError> {
            Ok(SynthesisResponse {
                audio: vec![0x07],
                mime_type: "audio/basic".into(),
            })
        }
    }

    fn beep_metadata(description: &str) -> ProviderMetadata {
        ProviderMetadata::new("beep", "Beep", description)
            .with_field(
                ConfigField::new("voice", "Voice", ConfigFieldType::String)
                    .with_default("low"),
            )
    }

    fn registry() -> TtsProviderRegistry {
        let mut registry = TtsProviderRegistry::new();
        let metadata = beep_metadata("first");
        registry.register(metadata.clone(), move |config| {
            Arc::new(Beep {
                metadata: metadata.clone(),
                config,
            }) as Arc<dyn TtsProvider>
        });
        registry
    }

    #[test]
    fn test_create_applies_defaults() {
        let provider = registry().create("beep", ProviderConfig::new("")).unwrap();
        assert_eq!(provider.config().id, "beep");
        assert_eq!(provider.config().get("voice").as_deref(), Some("low"));
    }

    #[test]
    fn test_unknown_type_is_none() {
        assert!(registry().create("honk", ProviderConfig::new("honk")).is_none());
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let mut registry = registry();
        let metadata = beep_metadata("second");
        registry.register(metadata.clone(), move |config| {
            Arc::new(Beep {
                metadata: metadata.clone(),
                config,
            }) as Arc<dyn TtsProvider>
        });
        let all = registry.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "second");
    }
}
