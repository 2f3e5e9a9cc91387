use crate::error_code::ProviderErrorCode;
use crate::providers::ProviderError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "circuit_breaker.failure_threshold", "tags")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "story_generator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type surfaced to callers of the runtime.
///
/// Retryable provider failures never appear here on their own: the orchestrator
/// absorbs them by falling back, and only reports them inside
/// [`Error::AllProvidersFailed`] once every provider is exhausted.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    /// A non-retryable provider failure that aborted the fallback chain.
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("All providers failed (attempted: [{}])", .attempted.join(", "))]
    AllProvidersFailed {
        attempted: Vec<String>,
        causes: Vec<ProviderError>,
    },

    #[error("Story generation failed after {attempts} attempts: {last_reason}")]
    GenerationFailed {
        attempts: u32,
        last_reason: String,
        /// Error raised by the final attempt; `None` when it was a content rejection.
        #[source]
        last_error: Option<Box<Error>>,
    },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Provider error codes carried by this error, in attempt order.
    ///
    /// Lets the transport layer decide between a generic "try again later"
    /// message and a configuration alert without matching on every variant.
    pub fn provider_codes(&self) -> Vec<ProviderErrorCode> {
        match self {
            Error::Provider(e) => vec![e.code],
            Error::AllProvidersFailed { causes, .. } => causes.iter().map(|c| c.code).collect(),
            Error::GenerationFailed {
                last_error: Some(cause),
                ..
            } => cause.provider_codes(),
            _ => Vec::new(),
        }
    }

    /// Whether a later attempt at the whole operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider(e) => e.retryable,
            Error::GenerationFailed {
                last_error: Some(cause),
                ..
            } => cause.is_retryable(),
            Error::Configuration { .. } | Error::Validation { .. } | Error::Cancelled => false,
            _ => true,
        }
    }
}
