//! OpenAI speech synthesis (`POST {baseUrl}/audio/speech`).

use crate::clients::common::{check_models, check_status, HttpSlot};
use crate::http_client::join_url;
use crate::provider::{
    ConfigField, ConfigFieldType, Provider, ProviderConfig, ProviderError, ProviderMetadata,
    ProviderTestResult, SynthesisRequest, SynthesisResponse, TtsProvider, KEY_API_KEY,
    KEY_BASE_URL, KEY_MODEL, KEY_PROXY, KEY_TIMEOUT,
};
use async_trait::async_trait;
use serde_json::json;

pub const PROVIDER_ID: &str = "openai_tts";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub fn metadata() -> ProviderMetadata {
    ProviderMetadata::new(PROVIDER_ID, "OpenAI TTS", "OpenAI text-to-speech")
        .with_field(ConfigField::new(KEY_API_KEY, "API key", ConfigFieldType::Password).required())
        .with_field(
            ConfigField::new(KEY_BASE_URL, "Base URL", ConfigFieldType::String)
                .with_default(DEFAULT_BASE_URL),
        )
        .with_field(
            ConfigField::new(KEY_MODEL, "Model", ConfigFieldType::Select)
                .with_default("tts-1")
                .with_options(&["tts-1", "tts-1-hd", "gpt-4o-mini-tts"]),
        )
        .with_field(
            ConfigField::new("voice", "Voice", ConfigFieldType::Select)
                .with_default("alloy")
                .with_options(&["alloy", "echo", "fable", "onyx", "nova", "shimmer"]),
        )
        .with_field(
            ConfigField::new("format", "Format", ConfigFieldType::Select)
                .with_default("mp3")
                .with_options(&["mp3", "opus", "aac", "flac", "wav"]),
        )
        .with_field(
            ConfigField::new(KEY_TIMEOUT, "Timeout (s)", ConfigFieldType::Number)
                .with_default("60"),
        )
        .with_field(ConfigField::new(KEY_PROXY, "Proxy", ConfigFieldType::String))
}

fn mime_for(format: &str) -> &'static str {
    match format {
        "opus" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "audio/mpeg",
    }
}

pub struct OpenAiTtsProvider {
    metadata: ProviderMetadata,
    config: ProviderConfig,
    http: HttpSlot,
}

impl OpenAiTtsProvider {
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
}

#[async_trait]
impl Provider for OpenAiTtsProvider {
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
        let model = self.config.get(KEY_MODEL);
        check_models(
            client
                .get(join_url(&self.base_url(), "models"))
                .bearer_auth(api_key),
            move |_| model.clone(),
        )
        .await
    }
}

#[async_trait]
impl TtsProvider for OpenAiTtsProvider {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<SynthesisResponse, ProviderError> {
        let api_key = self.config.require(KEY_API_KEY)?;
        let client = self.http.client(&self.config)?;
        let format = self.config.get("format").unwrap_or_else(|| "mp3".to_string());

        let mut body = json!({
            "model": self.config.get(KEY_MODEL).unwrap_or_else(|| "tts-1".to_string()),
            "input": request.text,
            "voice": request
                .voice
                .or_else(|| self.config.get("voice"))
                .unwrap_or_else(|| "alloy".to_string()),
            "response_format": format,
        });
        if let Some(speed) = request.speed {
            body["speed"] = json!(speed);
        }

        let response = client
            .post(join_url(&self.base_url(), "audio/speech"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await.map_err(|err| {
            log::error!("OpenAiTtsProvider::synthesize(...): {}", err);
            err
        })?;
        let audio = response.bytes().await?.to_vec();
        Ok(SynthesisResponse {
            audio,
            mime_type: mime_for(&format).to_string(),
        })
    }
}
