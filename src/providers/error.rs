use crate::error_code::ProviderErrorCode;
use std::sync::Arc;

/// Failure reported by a provider adapter, already classified.
///
/// `retryable` defaults to the code's retry semantics but adapters may
/// override it (e.g. a missing API key is always terminal).
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{provider_name}] {code}: {message}")]
pub struct ProviderError {
    pub provider_name: String,
    pub code: ProviderErrorCode,
    pub retryable: bool,
    pub message: String,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProviderError {
    pub fn new(
        provider_name: impl Into<String>,
        code: ProviderErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            code,
            retryable: code.retryable(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Missing credentials: never worth a fallback retry on the same provider.
    pub fn missing_api_key(provider_name: impl Into<String>) -> Self {
        Self::new(
            provider_name,
            ProviderErrorCode::Authentication,
            "API key not configured",
        )
        .with_retryable(false)
    }
}
