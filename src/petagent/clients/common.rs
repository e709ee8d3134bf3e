use crate::http_client::build_http_client;
use crate::provider::{ProviderConfig, ProviderError, ProviderTestResult};
use std::sync::{PoisonError, RwLock};

/// Lazily built HTTP client owned by one provider instance.
///
/// `initialize` is idempotent and `terminate` drops the client; operations that run before
/// `initialize` build it on demand.
#[derive(Default)]
pub struct HttpSlot {
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        self.client(config).map(|_| ())
    }

    pub fn terminate(&self) {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_initialized(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The current client, building it first if needed.
    pub fn client(&self, config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
        if let Some(client) = self
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(client.clone());
        }
        let mut slot = self.client.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = build_http_client(config)?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

/// Pass a success response through; turn anything else into [`ProviderError::Http`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Request `GET <url>` and report the first model id found by `pick`.
pub async fn check_models<F>(request: reqwest::RequestBuilder, pick: F) -> ProviderTestResult
where
    F: Fn(&serde_json::Value) -> Option<String>,
{
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return ProviderTestResult::failed(ProviderError::from(err)),
    };
    let response = match check_status(response).await {
        Ok(response) => response,
        Err(err) => return ProviderTestResult::failed(err),
    };
    match response.json::<serde_json::Value>().await {
        Ok(body) => ProviderTestResult::ok(pick(&body)),
        Err(err) => ProviderTestResult::failed(ProviderError::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }

    #[test]
    fn test_slot_lifecycle() {
        let slot = HttpSlot::new();
        let config = ProviderConfig::new("x");
        assert!(!slot.is_initialized());
        slot.initialize(&config).unwrap();
        slot.initialize(&config).unwrap();
        assert!(slot.is_initialized());
        slot.terminate();
        assert!(!slot.is_initialized());
    }
}
