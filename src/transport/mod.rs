//! HTTP transport shared by provider adapters and the moderation client.
//!
//! Owns the pooled `reqwest` client, API key resolution and the translation of
//! transport-level failures into [`ProviderError`](crate::providers::ProviderError)s.

pub mod http;

pub use http::{classify_http_error, classify_reqwest_error, AuthScheme, HttpTransport};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
