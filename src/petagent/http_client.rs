//! Unified HTTP client builder for provider instances.
//!
//! Every provider builds its `reqwest::Client` here so timeout, proxy and pooling behave
//! the same across vendors. Pool settings:
//! - `pool_max_idle_per_host(16)`
//! - `pool_idle_timeout(90s)`
//! - `tcp_keepalive(60s)`
//! - `connect_timeout(30s)`, or the request timeout when that is shorter

use crate::provider::{ProviderConfig, ProviderError};
use std::time::Duration;

/// Request timeout used when the configuration does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client honouring the configuration's `timeout` and `proxy`.
///
/// A malformed proxy URL is a configuration error, not something to silently skip.
pub fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
    let timeout = Duration::from_secs(
        config
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout);

    if let Some(proxy) = config.proxy.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy).map_err(|err| {
            ProviderError::InvalidConfiguration(format!("invalid proxy '{}': {}", proxy, err))
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|err| {
        log::error!("petagent::http_client::build_http_client(...): {}", err);
        ProviderError::Transport(err.to_string())
    })
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_with_defaults() {
        assert!(build_http_client(&ProviderConfig::new("openai")).is_ok());
    }

    #[test]
    fn test_proxy_is_applied_or_rejected() {
        let mut config = ProviderConfig::new("openai");
        config.proxy = Some("http://127.0.0.1:7890".into());
        assert!(build_http_client(&config).is_ok());

        config.proxy = Some("http://127.0.0.1:99999".into());
        assert!(matches!(
            build_http_client(&config),
            Err(ProviderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://api.x/v1/", "/chat"), "https://api.x/v1/chat");
        assert_eq!(join_url("https://api.x/v1", "chat"), "https://api.x/v1/chat");
    }
}
