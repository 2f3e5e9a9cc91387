use super::TransportError;
use crate::error_code::ProviderErrorCode;
use crate::pipeline::ByteStream;
use crate::providers::ProviderError;
use crate::{Error, ErrorContext, Result};
use futures::TryStreamExt;
use keyring::Entry;
use reqwest::{Method, Proxy, RequestBuilder, Response};
use std::env;
use std::time::Duration;
use url::Url;

/// Keyring service under which provider API keys may be stored.
pub const KEYRING_SERVICE: &str = "ai-story-runtime";

/// Longest slice of an error body copied into an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// How the API key travels with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `?key=<key>` query parameter
    QueryKey,
}

pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    auth: AuthScheme,
}

impl HttpTransport {
    pub fn new(
        provider: &str,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        auth: AuthScheme,
    ) -> Result<Self> {
        Url::parse(base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL for provider '{}'", provider),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.base_url", provider))
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })?;

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("AI_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )))
            // Story streams run for tens of seconds; keep long-lived connections alive.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            auth,
        })
    }

    /// Resolve an API key: OS keyring first, then `<PROVIDER>_API_KEY`.
    pub fn resolve_api_key(provider: &str) -> Option<String> {
        // 1. Try Keyring
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, provider) {
            if let Ok(key) = entry.get_password() {
                if !key.trim().is_empty() {
                    return Some(key);
                }
            }
        }

        // 2. Try Environment Variable (PROVIDER_API_KEY)
        let env_var = format!("{}_API_KEY", provider.to_uppercase());
        env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Authenticated request builder for `path` (relative to the base URL).
    ///
    /// Fails with a non-retryable AUTHENTICATION error when no key is configured.
    pub fn request(&self, method: Method, path: &str) -> std::result::Result<RequestBuilder, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::missing_api_key(&self.provider))?;

        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, url);
        Ok(match self.auth {
            AuthScheme::Bearer => req.bearer_auth(key),
            AuthScheme::QueryKey => req.query(&[("key", key)]),
        })
    }

    /// Send a request; non-2xx responses become classified provider errors.
    pub async fn send(&self, req: RequestBuilder) -> std::result::Result<Response, ProviderError> {
        let resp = req
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.provider, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_http_error(&self.provider, status.as_u16(), &body))
    }

    /// Body of a streaming response as raw chunks. Dropping the stream closes the connection.
    pub fn byte_stream(&self, resp: Response) -> ByteStream<ProviderError> {
        let provider = self.provider.clone();
        Box::pin(
            resp.bytes_stream()
                .map_err(move |e| classify_reqwest_error(&provider, e)),
        )
    }

    /// `GET path`, true on any 2xx. Never errors.
    pub async fn probe(&self, path: &str) -> bool {
        let req = match self.request(Method::GET, path) {
            Ok(req) => req,
            Err(_) => return false,
        };
        match self.send(req).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(provider = %self.provider, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Classify a failure raised by reqwest itself (no HTTP response to inspect).
pub fn classify_reqwest_error(provider: &str, err: reqwest::Error) -> ProviderError {
    let code = if err.is_timeout() {
        ProviderErrorCode::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        ProviderErrorCode::NetworkError
    } else if let Some(status) = err.status() {
        ProviderErrorCode::from_http_status(status.as_u16())
    } else {
        ProviderErrorCode::Unknown
    };
    let message = match code {
        ProviderErrorCode::Timeout => "request timed out".to_string(),
        _ => err.to_string(),
    };
    ProviderError::new(provider, code, message).with_cause(TransportError::Http(err))
}

/// Classify a non-2xx response.
///
/// A recognised provider error code in the JSON body (`error.code` or
/// `error.status`) wins over the HTTP status, so that e.g. a 400 carrying
/// `content_filter` is reported as CONTENT_FILTER rather than INVALID_REQUEST.
pub fn classify_http_error(provider: &str, status: u16, body: &str) -> ProviderError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error_obj = parsed.as_ref().and_then(|v| v.get("error"));

    let body_code = error_obj.and_then(|e| {
        ["code", "status"]
            .iter()
            .filter_map(|k| e.get(*k).and_then(|v| v.as_str()))
            .find_map(ProviderErrorCode::from_provider_code)
    });
    let code = body_code.unwrap_or_else(|| ProviderErrorCode::from_http_status(status));

    let detail = error_obj
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());

    ProviderError::new(provider, code, format!("HTTP {}: {}", status, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status_only() {
        let e = classify_http_error("gemini", 429, "slow down");
        assert_eq!(e.code, ProviderErrorCode::RateLimit);
        assert!(e.retryable);
        assert_eq!(e.message, "HTTP 429: slow down");

        let e = classify_http_error("gemini", 403, "");
        assert_eq!(e.code, ProviderErrorCode::Authentication);
        assert!(!e.retryable);
    }

    #[test]
    fn test_classify_body_code_wins() {
        let body = r#"{"error":{"message":"flagged","type":"invalid_request_error","code":"content_filter"}}"#;
        let e = classify_http_error("openai", 400, body);
        assert_eq!(e.code, ProviderErrorCode::ContentFilter);
        assert!(e.retryable);
        assert_eq!(e.message, "HTTP 400: flagged");
    }

    #[test]
    fn test_classify_gemini_status_field() {
        let body = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let e = classify_http_error("gemini", 429, body);
        assert_eq!(e.code, ProviderErrorCode::RateLimit);
    }

    #[test]
    fn test_request_without_key_is_auth_error() {
        let t = HttpTransport::new(
            "openai",
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            AuthScheme::Bearer,
        )
        .unwrap();
        let err = t.request(Method::GET, "/v1/models").unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::Authentication);
        assert!(!err.retryable);
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpTransport::new(
            "openai",
            "not a url",
            None,
            Duration::from_secs(1),
            AuthScheme::Bearer,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
