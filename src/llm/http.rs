//! Shared HTTP client with the transport retry policy
//!
//! One `reqwest::Client` per backend, reused across calls. Retry policy:
//! connection failures and 5xx responses retry up to 3 times with
//! exponential backoff starting at 4 s and capped at 60 s; 4xx responses are
//! provider errors and never retried; a request timeout surfaces as
//! `LlmError::Timeout` and is never retried.

use crate::llm::LlmError;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(4);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Backoff for the n-th retry (1-based): 4 s doubling, capped at 60 s.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    (INITIAL_BACKOFF * factor).min(MAX_BACKOFF)
}

/// Shared HTTP client for provider backends.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Construct with an optional HTTPS proxy.
    ///
    /// # Errors
    ///
    /// `Misconfiguration` if the client or proxy cannot be constructed.
    pub fn new(proxy: Option<&str>) -> Result<Self, LlmError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls();

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                LlmError::Misconfiguration(format!("invalid proxy '{proxy_url}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a request under the retry policy.
    ///
    /// # Errors
    ///
    /// - `Provider` for any 4xx
    /// - `Transport` for 5xx and network failures that exhaust retries
    /// - `Timeout` when the per-request timeout elapses (no retry)
    pub async fn execute_with_retry(
        &self,
        request_builder: reqwest::RequestBuilder,
        timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, LlmError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder
                .try_clone()
                .ok_or_else(|| {
                    LlmError::Transport("request body cannot be cloned for retry".to_string())
                })?
                .timeout(timeout)
                .build()
                .map_err(|e| LlmError::Transport(format!("failed to build request: {e}")))?;

            debug!(
                provider = provider_name,
                attempt,
                timeout_secs = timeout.as_secs(),
                "executing HTTP request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_client_error() {
                        return Err(map_client_error(status, provider_name));
                    }

                    if status.is_server_error() {
                        if attempt <= MAX_RETRIES {
                            let backoff = backoff_for_attempt(attempt);
                            warn!(
                                provider = provider_name,
                                attempt,
                                status = status.as_u16(),
                                backoff_secs = backoff.as_secs(),
                                "server error, retrying"
                            );
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                        return Err(LlmError::Transport(format!(
                            "{provider_name} returned server error: {status}"
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(LlmError::Timeout { duration: timeout });
                    }

                    if attempt <= MAX_RETRIES {
                        let backoff = backoff_for_attempt(attempt);
                        warn!(
                            provider = provider_name,
                            attempt,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "network error, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    return Err(LlmError::Transport(format!(
                        "{provider_name} request failed: {e}"
                    )));
                }
            }
        }
    }
}

/// 4xx → provider error with enough context to act on.
fn map_client_error(status: StatusCode, provider_name: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Provider(format!(
            "{provider_name} authentication failed: {status}"
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::Provider(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => LlmError::Provider(format!("{provider_name} rejected the request: {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(backoff_for_attempt(5), Duration::from_secs(60));
        assert_eq!(backoff_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_401_maps_to_provider_error() {
        let err = map_client_error(StatusCode::UNAUTHORIZED, "anthropic");
        match err {
            LlmError::Provider(msg) => {
                assert!(msg.contains("anthropic"));
                assert!(msg.contains("401"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_429_maps_to_provider_error() {
        let err = map_client_error(StatusCode::TOO_MANY_REQUESTS, "anthropic");
        match err {
            LlmError::Provider(msg) => assert!(msg.contains("rate limit")),
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_client_constructs_without_proxy() {
        assert!(HttpClient::new(None).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_misconfiguration() {
        let err = HttpClient::new(Some("::not a url::")).unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(_)));
    }
}
