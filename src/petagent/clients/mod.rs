//! Built-in provider implementations.
//!
//! Each submodule speaks one vendor's API while conforming to the uniform
//! [`LlmProvider`](crate::provider::LlmProvider) / [`TtsProvider`](crate::provider::TtsProvider)
//! contract, and exposes its `metadata()` for the registry.

pub mod common;

pub mod claude;
pub mod elevenlabs;
pub mod openai;
pub mod openai_tts;

use crate::provider::{LlmProvider, TtsProvider};
use crate::provider_registry::{LlmProviderRegistry, TtsProviderRegistry};
use std::sync::Arc;

/// Register `openai` and `claude`.
pub fn register_builtin_llm_providers(registry: &mut LlmProviderRegistry) {
    registry.register(openai::metadata(), |config| {
        Arc::new(openai::OpenAiProvider::new(config)) as Arc<dyn LlmProvider>
    });
    registry.register(claude::metadata(), |config| {
        Arc::new(claude::ClaudeProvider::new(config)) as Arc<dyn LlmProvider>
    });
}

/// Register `openai_tts` and `elevenlabs`.
pub fn register_builtin_tts_providers(registry: &mut TtsProviderRegistry) {
    registry.register(openai_tts::metadata(), |config| {
        Arc::new(openai_tts::OpenAiTtsProvider::new(config)) as Arc<dyn TtsProvider>
    });
    registry.register(elevenlabs::metadata(), |config| {
        Arc::new(elevenlabs::ElevenLabsProvider::new(config)) as Arc<dyn TtsProvider>
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids() {
        let mut llm = LlmProviderRegistry::new();
        register_builtin_llm_providers(&mut llm);
        let ids: Vec<_> = llm.get_all().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["openai", "claude"]);

        let mut tts = TtsProviderRegistry::new();
        register_builtin_tts_providers(&mut tts);
        assert!(tts.contains("openai_tts"));
        assert!(tts.contains("elevenlabs"));
    }
}
