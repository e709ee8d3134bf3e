//! User-managed provider instances.
//!
//! [`ProviderInstanceManager`] owns the persisted list of [`ProviderInstanceConfig`]s and
//! the live providers built from them. Live providers are created lazily on first use,
//! initialized once, and terminated when their instance is edited, disabled, removed, or
//! when the manager shuts down.
//!
//! Per capability (LLM, TTS) at most one instance is primary. The first instance added
//! becomes primary; when the primary is removed, the first remaining enabled instance of the
//! same capability is promoted.

use crate::provider::{
    LlmProvider, Provider, ProviderCapability, ProviderError, ProviderInstanceConfig,
    ProviderTestResult, TtsProvider,
};
use crate::provider_registry::{LlmProviderRegistry, TtsProviderRegistry};
use crate::store::SettingsStore;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Receives the full instance list after every mutation.
pub type InstancePersistCallback = Arc<dyn Fn(&[ProviderInstanceConfig]) + Send + Sync>;

pub struct ProviderInstanceManager {
    llm_registry: Arc<LlmProviderRegistry>,
    tts_registry: Arc<TtsProviderRegistry>,
    instances: RwLock<Vec<ProviderInstanceConfig>>,
    live_llm: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    live_tts: Mutex<HashMap<String, Arc<dyn TtsProvider>>>,
    persist: Option<InstancePersistCallback>,
}

/// At most one primary per capability; if there is none, the first enabled instance.
fn normalize_primary(instances: &mut [ProviderInstanceConfig]) {
    for capability in [ProviderCapability::Llm, ProviderCapability::Tts] {
        let mut seen = false;
        for instance in instances.iter_mut().filter(|i| i.capability == capability) {
            if instance.primary {
                if seen {
                    instance.primary = false;
                }
                seen = true;
            }
        }
        if !seen {
            if let Some(first) = instances
                .iter_mut()
                .find(|i| i.capability == capability && i.enabled)
            {
                first.primary = true;
            }
        }
    }
}

async fn run_check<P: Provider + ?Sized>(provider: &P) -> ProviderTestResult {
    let result = provider.test().await;
    provider.terminate().await;
    result
}

impl ProviderInstanceManager {
    pub fn new(
        llm_registry: Arc<LlmProviderRegistry>,
        tts_registry: Arc<TtsProviderRegistry>,
    ) -> Self {
        Self {
            llm_registry,
            tts_registry,
            instances: RwLock::new(Vec::new()),
            live_llm: Mutex::new(HashMap::new()),
            live_tts: Mutex::new(HashMap::new()),
            persist: None,
        }
    }

    pub fn with_persist(mut self, persist: InstancePersistCallback) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Persist the instance list into the provider part of the application settings.
    pub fn with_settings_store(self, store: Arc<dyn SettingsStore>) -> Self {
        self.with_persist(Arc::new(move |instances: &[ProviderInstanceConfig]| {
            if let Err(err) = store.save_provider_instances(instances) {
                error!("ProviderInstanceManager: could not persist instances: {}", err);
            }
        }))
    }

    /// Seed the list from persisted settings. Nothing is persisted back.
    pub fn load(&self, instances: Vec<ProviderInstanceConfig>) {
        let mut instances = instances;
        normalize_primary(&mut instances);
        *self.instances.write().unwrap_or_else(PoisonError::into_inner) = instances;
    }

    pub fn instances(&self) -> Vec<ProviderInstanceConfig> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn instance(&self, id: &str) -> Option<ProviderInstanceConfig> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    pub fn primary(&self, capability: ProviderCapability) -> Option<ProviderInstanceConfig> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|i| i.capability == capability && i.primary)
            .cloned()
    }

    fn known_type(&self, capability: ProviderCapability, provider_type: &str) -> bool {
        match capability {
            ProviderCapability::Llm => self.llm_registry.contains(provider_type),
            ProviderCapability::Tts => self.tts_registry.contains(provider_type),
        }
    }

    /// Apply `change` to the list, normalize primaries, persist, and return the change's output.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<ProviderInstanceConfig>) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let (output, snapshot) = {
            let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
            let output = change(&mut instances)?;
            normalize_primary(&mut instances);
            (output, instances.clone())
        };
        if let Some(persist) = &self.persist {
            persist(&snapshot);
        }
        Ok(output)
    }

    /// Add an instance. An empty id is replaced with a fresh one.
    pub fn add_instance(
        &self,
        mut config: ProviderInstanceConfig,
    ) -> Result<ProviderInstanceConfig, ProviderError> {
        if !self.known_type(config.capability, &config.provider_type) {
            return Err(ProviderError::UnknownProvider(config.provider_type));
        }
        if config.id.trim().is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        config.config.id = config.provider_type.clone();

        let id = config.id.clone();
        self.mutate(move |instances| {
            if instances.iter().any(|i| i.id == config.id) {
                return Err(ProviderError::InvalidConfiguration(format!(
                    "duplicate instance id '{}'",
                    config.id
                )));
            }
            if config.primary {
                for other in instances.iter_mut().filter(|i| i.capability == config.capability) {
                    other.primary = false;
                }
            }
            instances.push(config);
            Ok(())
        })?;
        info!("ProviderInstanceManager::add_instance(...): added '{}'", id);
        self.instance(&id)
            .ok_or(ProviderError::InstanceNotFound(id))
    }

    /// Replace an instance's configuration; any live provider for it is terminated.
    pub async fn update_instance(
        &self,
        mut config: ProviderInstanceConfig,
    ) -> Result<(), ProviderError> {
        if !self.known_type(config.capability, &config.provider_type) {
            return Err(ProviderError::UnknownProvider(config.provider_type));
        }
        config.config.id = config.provider_type.clone();
        let id = config.id.clone();
        self.mutate(move |instances| {
            let index = instances
                .iter()
                .position(|i| i.id == config.id)
                .ok_or_else(|| ProviderError::InstanceNotFound(config.id.clone()))?;
            if config.primary {
                for other in instances.iter_mut().filter(|i| i.capability == config.capability) {
                    other.primary = false;
                }
            }
            instances[index] = config;
            Ok(())
        })?;
        self.terminate_live(&id).await;
        Ok(())
    }

    /// Remove an instance, terminating its live provider.
    pub async fn remove_instance(&self, id: &str) -> Result<ProviderInstanceConfig, ProviderError> {
        let removed = self.mutate(|instances| {
            let index = instances
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
            // a surviving instance gets promoted by normalization
            Ok(instances.remove(index))
        })?;
        self.terminate_live(id).await;
        info!("ProviderInstanceManager::remove_instance(...): removed '{}'", id);
        Ok(removed)
    }

    pub fn set_primary(&self, id: &str) -> Result<(), ProviderError> {
        self.mutate(|instances| {
            let capability = instances
                .iter()
                .find(|i| i.id == id)
                .map(|i| i.capability)
                .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
            for instance in instances.iter_mut().filter(|i| i.capability == capability) {
                instance.primary = instance.id == id;
            }
            Ok(())
        })
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ProviderError> {
        self.mutate(|instances| {
            let instance = instances
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
            instance.enabled = enabled;
            Ok(())
        })?;
        if !enabled {
            self.terminate_live(id).await;
        }
        Ok(())
    }

    fn usable(
        &self,
        id: &str,
        capability: ProviderCapability,
    ) -> Result<ProviderInstanceConfig, ProviderError> {
        let instance = self
            .instance(id)
            .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
        if instance.capability != capability {
            return Err(ProviderError::InvalidConfiguration(format!(
                "instance '{}' is not a {} provider",
                id, capability
            )));
        }
        if !instance.enabled {
            return Err(ProviderError::Disabled(id.to_string()));
        }
        Ok(instance)
    }

    /// The live LLM provider for an instance, built and initialized on first use.
    pub async fn llm_provider(&self, id: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let instance = self.usable(id, ProviderCapability::Llm)?;
        let mut live = self.live_llm.lock().await;
        if let Some(provider) = live.get(id) {
            return Ok(Arc::clone(provider));
        }
        let provider = self
            .llm_registry
            .create(&instance.provider_type, instance.config)
            .ok_or_else(|| ProviderError::UnknownProvider(instance.provider_type.clone()))?;
        provider.initialize().await?;
        debug!("ProviderInstanceManager::llm_provider(...): initialized '{}'", id);
        live.insert(id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    pub async fn tts_provider(&self, id: &str) -> Result<Arc<dyn TtsProvider>, ProviderError> {
        let instance = self.usable(id, ProviderCapability::Tts)?;
        let mut live = self.live_tts.lock().await;
        if let Some(provider) = live.get(id) {
            return Ok(Arc::clone(provider));
        }
        let provider = self
            .tts_registry
            .create(&instance.provider_type, instance.config)
            .ok_or_else(|| ProviderError::UnknownProvider(instance.provider_type.clone()))?;
        provider.initialize().await?;
        debug!("ProviderInstanceManager::tts_provider(...): initialized '{}'", id);
        live.insert(id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    pub async fn primary_llm(&self) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let primary = self
            .primary(ProviderCapability::Llm)
            .ok_or_else(|| ProviderError::InstanceNotFound("primary llm".to_string()))?;
        self.llm_provider(&primary.id).await
    }

    pub async fn primary_tts(&self) -> Result<Arc<dyn TtsProvider>, ProviderError> {
        let primary = self
            .primary(ProviderCapability::Tts)
            .ok_or_else(|| ProviderError::InstanceNotFound("primary tts".to_string()))?;
        self.tts_provider(&primary.id).await
    }

    /// Check a configuration without adding it: a throwaway provider is built, tested and
    /// terminated.
    pub async fn test_instance(&self, config: &ProviderInstanceConfig) -> ProviderTestResult {
        let unknown = || {
            ProviderTestResult::failed(ProviderError::UnknownProvider(config.provider_type.clone()))
        };
        match config.capability {
            ProviderCapability::Llm => {
                match self.llm_registry.create(&config.provider_type, config.config.clone()) {
                    Some(provider) => run_check(provider.as_ref()).await,
                    None => unknown(),
                }
            }
            ProviderCapability::Tts => {
                match self.tts_registry.create(&config.provider_type, config.config.clone()) {
                    Some(provider) => run_check(provider.as_ref()).await,
                    None => unknown(),
                }
            }
        }
    }

    /// Ids of instances with a live provider.
    pub async fn live_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live_llm.lock().await.keys().cloned().collect();
        ids.extend(self.live_tts.lock().await.keys().cloned());
        ids.sort();
        ids
    }

    async fn terminate_live(&self, id: &str) {
        let llm = self.live_llm.lock().await.remove(id);
        if let Some(provider) = llm {
            provider.terminate().await;
            debug!("ProviderInstanceManager: terminated llm '{}'", id);
        }
        let tts = self.live_tts.lock().await.remove(id);
        if let Some(provider) = tts {
            provider.terminate().await;
            debug!("ProviderInstanceManager: terminated tts '{}'", id);
        }
    }

    /// Terminate every live provider. The instance list is kept.
    pub async fn shutdown(&self) {
        let llm: Vec<_> = self.live_llm.lock().await.drain().collect();
        let tts: Vec<_> = self.live_tts.lock().await.drain().collect();
        for (_, provider) in llm {
            provider.terminate().await;
        }
        for (_, provider) in tts {
            provider.terminate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        ChatRequest, ChatResponse, ProviderConfig, ProviderMetadata, SynthesisRequest,
        SynthesisResponse,
    };
    use crate::store::{AgentSettings, MemorySettingsStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TERMINATED: AtomicUsize = AtomicUsize::new(0);

    struct Echo {
        metadata: ProviderMetadata,
        config: ProviderConfig,
    }

    #[async_trait]
    impl Provider for Echo {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn terminate(&self) {
            TERMINATED.fetch_add(1, Ordering::SeqCst);
        }
        async fn test(&self) -> ProviderTestResult {
            ProviderTestResult::ok(self.config.model.clone())
        }
    }

    #[async_trait]
    impl LlmProvider for Echo {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse::default())
        }
    }

    #[async_trait]
    impl TtsProvider for Echo {
        async fn synthesize(
            &self,
            _request: SynthesisRequest,
        ) -> Result<SynthesisResponse, ProviderError> {
            Err(ProviderError::Unsupported("silent".into()))
        }
    }

    fn manager() -> ProviderInstanceManager {
        let mut llm = LlmProviderRegistry::new();
        llm.register(ProviderMetadata::new("echo", "Echo", ""), |config| {
            let metadata = ProviderMetadata::new("echo", "Echo", "");
            Arc::new(Echo { metadata, config }) as Arc<dyn LlmProvider>
        });
        let mut tts = TtsProviderRegistry::new();
        tts.register(ProviderMetadata::new("hum", "Hum", ""), |config| {
            let metadata = ProviderMetadata::new("hum", "Hum", "");
            Arc::new(Echo { metadata, config }) as Arc<dyn TtsProvider>
        });
        ProviderInstanceManager::new(Arc::new(llm), Arc::new(tts))
    }

    fn llm(name: &str) -> ProviderInstanceConfig {
        ProviderInstanceConfig::new(name, ProviderCapability::Llm, ProviderConfig::new("echo"))
    }

    #[test]
    fn test_first_instance_per_capability_is_primary() {
        let manager = manager();
        let a = manager.add_instance(llm("a")).unwrap();
        let b = manager.add_instance(llm("b")).unwrap();
        let voice = manager
            .add_instance(ProviderInstanceConfig::new(
                "voice",
                ProviderCapability::Tts,
                ProviderConfig::new("hum"),
            ))
            .unwrap();

        assert!(a.primary);
        assert!(!b.primary);
        assert!(voice.primary);

        manager.set_primary(&b.id).unwrap();
        assert_eq!(manager.primary(ProviderCapability::Llm).unwrap().id, b.id);
        assert!(!manager.instance(&a.id).unwrap().primary);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let manager = manager();
        let err = manager
            .add_instance(ProviderInstanceConfig::new(
                "x",
                ProviderCapability::Llm,
                ProviderConfig::new("hum"),
            ))
            .unwrap_err();
        assert_eq!(err, ProviderError::UnknownProvider("hum".into()));
    }

    #[tokio::test]
    async fn test_removing_primary_promotes_first_enabled() {
        let manager = manager();
        let a = manager.add_instance(llm("a")).unwrap();
        let b = manager.add_instance(llm("b")).unwrap();
        let c = manager.add_instance(llm("c")).unwrap();
        manager.set_enabled(&b.id, false).await.unwrap();

        manager.remove_instance(&a.id).await.unwrap();
        assert_eq!(manager.primary(ProviderCapability::Llm).unwrap().id, c.id);
    }

    #[tokio::test]
    async fn test_live_provider_is_cached_until_edited() {
        let manager = manager();
        let mut a = manager.add_instance(llm("a")).unwrap();

        let first = manager.llm_provider(&a.id).await.unwrap();
        let again = manager.primary_llm().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let before = TERMINATED.load(Ordering::SeqCst);
        a.config.model = Some("bigger".into());
        manager.update_instance(a.clone()).await.unwrap();
        assert!(TERMINATED.load(Ordering::SeqCst) > before);
        assert!(manager.live_instances().await.is_empty());

        let rebuilt = manager.llm_provider(&a.id).await.unwrap();
        assert_eq!(rebuilt.config().model.as_deref(), Some("bigger"));
    }

    #[tokio::test]
    async fn test_disabled_and_missing_instances() {
        let manager = manager();
        let a = manager.add_instance(llm("a")).unwrap();
        manager.set_enabled(&a.id, false).await.unwrap();

        assert!(matches!(manager.llm_provider(&a.id).await, Err(ProviderError::Disabled(_))));
        assert!(matches!(
            manager.llm_provider("nope").await,
            Err(ProviderError::InstanceNotFound(_))
        ));
        assert!(matches!(
            manager.tts_provider(&a.id).await,
            Err(ProviderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_mutations_are_persisted() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let manager = manager().with_persist(Arc::new(move |instances: &[ProviderInstanceConfig]| {
            counter.store(instances.len(), Ordering::SeqCst);
        }));
        manager.add_instance(llm("a")).unwrap();
        manager.add_instance(llm("b")).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settings_store_keeps_the_mcp_list() {
        let store = Arc::new(MemorySettingsStore::new(AgentSettings {
            mcp_servers: vec![mcp::McpServerConfig::new("files", "http://h:1/sse")],
            provider_instances: Vec::new(),
        }));
        let manager = manager().with_settings_store(store.clone());
        let a = manager.add_instance(llm("a")).unwrap();
        manager.remove_instance(&a.id).await.unwrap();
        manager.add_instance(llm("b")).unwrap();

        let saved = store.load().unwrap();
        assert_eq!(saved.mcp_servers.len(), 1);
        assert_eq!(saved.provider_instances.len(), 1);
        assert_eq!(saved.provider_instances[0].name, "b");
        assert!(saved.provider_instances[0].primary);
    }

    #[tokio::test]
    async fn test_config_without_adding() {
        let manager = manager();
        let mut candidate = llm("candidate");
        candidate.config.model = Some("m".into());
        let result = manager.test_instance(&candidate).await;
        assert!(result.success);
        assert_eq!(result.sample_model.as_deref(), Some("m"));
        assert!(manager.instances().is_empty());
    }
}
