//! ElevenLabs speech synthesis (`POST {baseUrl}/v1/text-to-speech/{voiceId}`).

use crate::clients::common::{check_models, check_status, HttpSlot};
use crate::http_client::join_url;
use crate::provider::{
    ConfigField, ConfigFieldType, Provider, ProviderConfig, ProviderError, ProviderMetadata,
    ProviderTestResult, SynthesisRequest, SynthesisResponse, TtsProvider, KEY_API_KEY,
    KEY_BASE_URL, KEY_MODEL, KEY_PROXY, KEY_TIMEOUT,
};
use async_trait::async_trait;
use serde_json::json;

pub const PROVIDER_ID: &str = "elevenlabs";
pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

pub fn metadata() -> ProviderMetadata {
    ProviderMetadata::new(PROVIDER_ID, "ElevenLabs", "ElevenLabs text-to-speech")
        .with_field(ConfigField::new(KEY_API_KEY, "API key", ConfigFieldType::Password).required())
        .with_field(
            ConfigField::new(KEY_BASE_URL, "Base URL", ConfigFieldType::String)
                .with_default(DEFAULT_BASE_URL),
        )
        .with_field(
            ConfigField::new("voiceId", "Voice id", ConfigFieldType::String)
                .with_default(DEFAULT_VOICE),
        )
        .with_field(
            ConfigField::new(KEY_MODEL, "Model", ConfigFieldType::String)
                .with_default(DEFAULT_MODEL),
        )
        .with_field(
            ConfigField::new("stability", "Stability", ConfigFieldType::Number)
                .with_default("0.5"),
        )
        .with_field(
            ConfigField::new("similarityBoost", "Similarity boost", ConfigFieldType::Number)
                .with_default("0.75"),
        )
        .with_field(
            ConfigField::new(KEY_TIMEOUT, "Timeout (s)", ConfigFieldType::Number)
                .with_default("60"),
        )
        .with_field(ConfigField::new(KEY_PROXY, "Proxy", ConfigFieldType::String))
}

pub struct ElevenLabsProvider {
    metadata: ProviderMetadata,
    config: ProviderConfig,
    http: HttpSlot,
}

impl ElevenLabsProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let metadata = metadata();
        Self {
            config: config.with_defaults(&metadata),
            metadata,
            http: HttpSlot::new(),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .get(KEY_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn number(&self, key: &str, fallback: f64) -> f64 {
        self.config
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(fallback)
    }
}

#[async_trait]
impl Provider for ElevenLabsProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.config.validate(&self.metadata)?;
        self.http.initialize(&self.config)
    }

    async fn terminate(&self) {
        self.http.terminate();
    }

    async fn test(&self) -> ProviderTestResult {
        let api_key = match self.config.require(KEY_API_KEY) {
            Ok(key) => key,
            Err(err) => return ProviderTestResult::failed(err),
        };
        let client = match self.http.client(&self.config) {
            Ok(client) => client,
            Err(err) => return ProviderTestResult::failed(err),
        };
        let request = client
            .get(join_url(&self.base_url(), "v1/models"))
            .header("xi-api-key", api_key);
        check_models(request, |body| {
            body.as_array()
                .and_then(|models| models.first())
                .and_then(|model| model["model_id"].as_str())
                .map(str::to_string)
        })
        .await
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<SynthesisResponse, ProviderError> {
        let api_key = self.config.require(KEY_API_KEY)?;
        let client = self.http.client(&self.config)?;
        let voice = request
            .voice
            .or_else(|| self.config.get("voiceId"))
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let mut settings = json!({
            "stability": self.number("stability", 0.5),
            "similarity_boost": self.number("similarityBoost", 0.75),
        });
        if let Some(speed) = request.speed {
            settings["speed"] = json!(speed);
        }
        let body = json!({
            "text": request.text,
            "model_id": self.config.get(KEY_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            "voice_settings": settings,
        });

        let response = client
            .post(join_url(&self.base_url(), &format!("v1/text-to-speech/{}", voice)))
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await.map_err(|err| {
            log::error!("ElevenLabsProvider::synthesize(...): {}", err);
            err
        })?;
        Ok(SynthesisResponse {
            audio: response.bytes().await?.to_vec(),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_invalid_configuration() {
        let provider = ElevenLabsProvider::new(ProviderConfig::new(PROVIDER_ID));
        assert_eq!(provider.config().get("voiceId").as_deref(), Some(DEFAULT_VOICE));
        let err = provider
            .synthesize(SynthesisRequest::new("purr"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfiguration(_)));
    }
}
