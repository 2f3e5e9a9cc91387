//! Provider error codes.
//!
//! Every adapter translates its backend-specific failure shapes (HTTP status,
//! transport timeouts, content-filter flags inside a stream) into this closed set.
//! The orchestrator only ever looks at the code and its retry semantics.
//!
//! | Code              | Retryable | Typical source                        |
//! |-------------------|-----------|---------------------------------------|
//! | `TIMEOUT`         | yes       | request exceeded the adapter timeout  |
//! | `RATE_LIMIT`      | yes       | HTTP 429                              |
//! | `AUTHENTICATION`  | no        | HTTP 401/403, missing API key         |
//! | `INVALID_REQUEST` | no        | HTTP 400/404/422                      |
//! | `SERVER_ERROR`    | yes       | HTTP 5xx, missing response body       |
//! | `NETWORK_ERROR`   | yes       | connect/DNS/body read failures        |
//! | `CONTENT_FILTER`  | yes       | provider safety filter tripped        |
//! | `UNKNOWN`         | yes       | anything unrecognised                 |
//!
//! ## Example
//!
//! ```rust
//! use ai_story_runtime::error_code::ProviderErrorCode;
//!
//! let code = ProviderErrorCode::from_http_status(429);
//! assert_eq!(code, ProviderErrorCode::RateLimit);
//! assert!(code.retryable());
//! assert_eq!(code.name(), "RATE_LIMIT");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    /// Request exceeded the adapter's configured timeout
    Timeout,
    /// Provider rejected the call because of request rate or quota
    RateLimit,
    /// Invalid, expired, or missing credentials
    Authentication,
    /// Malformed request that would fail identically on every attempt
    InvalidRequest,
    /// Provider-side failure
    ServerError,
    /// Connection, DNS, or body read failure
    NetworkError,
    /// Provider safety filter blocked the generated content
    ContentFilter,
    /// Could not be classified
    Unknown,
}

impl ProviderErrorCode {
    /// Canonical upper-case name (e.g. `"RATE_LIMIT"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::Authentication => "AUTHENTICATION",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ServerError => "SERVER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ContentFilter => "CONTENT_FILTER",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the orchestrator may fall back to the next provider.
    ///
    /// Only configuration problems are terminal; unrecognised conditions fail
    /// open toward retry since transient infrastructure issues are the common case.
    #[inline]
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::Authentication | Self::InvalidRequest)
    }

    /// Maps an HTTP status returned by a provider backend.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 404 | 422 => Self::InvalidRequest,
            401 | 403 => Self::Authentication,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Maps a provider error code/type string found in a JSON error body.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "content_filter" | "content_policy_violation" | "SAFETY" => Self::ContentFilter,
            "rate_limit_exceeded" | "insufficient_quota" | "RESOURCE_EXHAUSTED" => Self::RateLimit,
            "invalid_api_key" | "authentication_error" | "PERMISSION_DENIED"
            | "UNAUTHENTICATED" => Self::Authentication,
            "invalid_request_error" | "model_not_found" | "INVALID_ARGUMENT" | "NOT_FOUND" => {
                Self::InvalidRequest
            }
            "server_error" | "INTERNAL" | "UNAVAILABLE" => Self::ServerError,
            "DEADLINE_EXCEEDED" => Self::Timeout,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_codes() {
        assert!(!ProviderErrorCode::Authentication.retryable());
        assert!(!ProviderErrorCode::InvalidRequest.retryable());
    }

    #[test]
    fn test_retryable_codes() {
        for code in [
            ProviderErrorCode::Timeout,
            ProviderErrorCode::RateLimit,
            ProviderErrorCode::ServerError,
            ProviderErrorCode::NetworkError,
            ProviderErrorCode::ContentFilter,
            ProviderErrorCode::Unknown,
        ] {
            assert!(code.retryable(), "{} should be retryable", code);
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ProviderErrorCode::from_http_status(400), ProviderErrorCode::InvalidRequest);
        assert_eq!(ProviderErrorCode::from_http_status(401), ProviderErrorCode::Authentication);
        assert_eq!(ProviderErrorCode::from_http_status(403), ProviderErrorCode::Authentication);
        assert_eq!(ProviderErrorCode::from_http_status(429), ProviderErrorCode::RateLimit);
        assert_eq!(ProviderErrorCode::from_http_status(502), ProviderErrorCode::ServerError);
        assert_eq!(ProviderErrorCode::from_http_status(504), ProviderErrorCode::Timeout);
        assert_eq!(ProviderErrorCode::from_http_status(418), ProviderErrorCode::Unknown);
    }

    #[test]
    fn test_provider_code_mapping() {
        assert_eq!(
            ProviderErrorCode::from_provider_code("content_filter"),
            Some(ProviderErrorCode::ContentFilter)
        );
        assert_eq!(
            ProviderErrorCode::from_provider_code("RESOURCE_EXHAUSTED"),
            Some(ProviderErrorCode::RateLimit)
        );
        assert_eq!(ProviderErrorCode::from_provider_code("something_else"), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ProviderErrorCode::RateLimit).unwrap();
        assert_eq!(json, "\"RATE_LIMIT\"");
    }
}
