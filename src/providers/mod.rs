//! Provider adapters.
//!
//! # Provider Contract
//!
//! Every backend is wrapped by a [`ProviderAdapter`]: a uniform, object-safe
//! contract the orchestrator drives without knowing which vendor sits behind it.
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | [`stream_generate`](ProviderAdapter::stream_generate) | one network request, lazily yields text fragments, not restartable |
//! | [`try_generate_title`](ProviderAdapter::try_generate_title) | single-shot short title |
//! | [`generate_title`](ProviderAdapter::generate_title) | same, but never fails (falls back to [`DEFAULT_TITLE`]) |
//! | [`health_check`](ProviderAdapter::health_check) | advisory liveness probe |
//!
//! All failures are reported as [`ProviderError`] with a code from the closed
//! [`ProviderErrorCode`](crate::error_code::ProviderErrorCode) set.
//!
//! ## Adapters
//!
//! | Module | Backend | Wire framing |
//! |--------|---------|--------------|
//! | [`openai`] | chat completions | SSE `data:` envelopes |
//! | [`gemini`] | `streamGenerateContent` | streamed JSON array |

pub mod error;
pub mod gemini;
pub mod openai;

pub use error::ProviderError;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

use crate::pipeline::FrameStream;
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Title used when every title attempt failed.
pub const DEFAULT_TITLE: &str = "A New Story";

/// Title used when a provider answered with nothing usable.
pub const UNTITLED: &str = "Untitled";

/// Only the beginning of a story is sent for titling.
pub const TITLE_SOURCE_CHARS: usize = 1000;

/// Lazily produced text fragments. The stream ends after the first error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'static>>;

/// Static description of a configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Lower is tried first.
    pub priority: u32,
    pub enabled: bool,
    pub supports_streaming: bool,
    pub timeout: Duration,
    pub model: String,
}

/// System and user prompt handed to a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Sampling parameters. Each adapter uses the fields its backend understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleParameters {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for StyleParameters {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 4000,
            top_p: 0.95,
            top_k: 40,
            presence_penalty: 0.6,
            frequency_penalty: 0.3,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Start a generation. Errors before the first byte are returned directly;
    /// errors during the stream arrive as its last item.
    async fn stream_generate(
        &self,
        prompt: &Prompt,
        params: &StyleParameters,
    ) -> Result<FragmentStream, ProviderError>;

    /// Ask for a short title for `text`. Empty answers are returned as-is.
    async fn try_generate_title(&self, text: &str) -> Result<String, ProviderError>;

    async fn generate_title(&self, text: &str) -> String {
        match self.try_generate_title(text).await {
            Ok(raw) => normalize_title(&raw),
            Err(e) => {
                tracing::debug!(provider = self.name(), error = %e, "title generation failed");
                DEFAULT_TITLE.to_string()
            }
        }
    }

    /// Advisory only; must not mutate circuit state.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Trim whitespace and wrapping quotes; empty becomes [`UNTITLED`].
pub fn normalize_title(raw: &str) -> String {
    let title = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」'))
        .trim();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title.to_string()
    }
}

/// First [`TITLE_SOURCE_CHARS`] characters of a story.
pub fn title_excerpt(text: &str) -> String {
    text.chars().take(TITLE_SOURCE_CHARS).collect()
}

/// What one decoded frame contributes to the fragment stream.
#[derive(Debug, Default)]
pub(crate) struct FrameOutcome {
    pub text: Option<String>,
    /// Raised after `text` is yielded.
    pub error: Option<ProviderError>,
}

/// Map decoded frames to fragments, stopping after the first error.
pub(crate) fn fragments_from_frames<F>(frames: FrameStream<ProviderError>, extract: F) -> FragmentStream
where
    F: FnMut(&Value) -> FrameOutcome + Send + 'static,
{
    struct State<F> {
        frames: FrameStream<ProviderError>,
        extract: F,
        pending: Option<ProviderError>,
        done: bool,
    }

    let state = State {
        frames,
        extract,
        pending: None,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            if let Some(e) = st.pending.take() {
                st.done = true;
                return Some((Err(e), st));
            }
            match st.frames.next().await {
                None => return None,
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                Some(Ok(frame)) => {
                    let outcome = (st.extract)(&frame);
                    st.pending = outcome.error;
                    if let Some(text) = outcome.text.filter(|t| !t.is_empty()) {
                        return Some((Ok(text), st));
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ProviderErrorCode;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  \"달빛 아래\"\n"), "달빛 아래");
        assert_eq!(normalize_title("   "), UNTITLED);
        assert_eq!(normalize_title("\"\""), UNTITLED);
    }

    #[test]
    fn test_title_excerpt_counts_chars() {
        let text = "가".repeat(1500);
        assert_eq!(title_excerpt(&text).chars().count(), TITLE_SOURCE_CHARS);
    }

    #[test]
    fn test_default_style_parameters() {
        let p = StyleParameters::default();
        assert_eq!(p.max_tokens, 4000);
        assert_eq!(p.top_k, 40);
        assert!((p.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_fragments_stop_after_error() {
        let frames: FrameStream<ProviderError> = Box::pin(futures::stream::iter(vec![
            Ok(serde_json::json!({"t": "a"})),
            Ok(serde_json::json!({"t": "", "stop": true})),
            Ok(serde_json::json!({"t": "b"})),
        ]));
        let out: Vec<_> = fragments_from_frames(frames, |v| FrameOutcome {
            text: v["t"].as_str().map(str::to_string),
            error: v
                .get("stop")
                .map(|_| ProviderError::new("p", ProviderErrorCode::ContentFilter, "blocked")),
        })
        .collect()
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "a");
        assert_eq!(out[1].as_ref().unwrap_err().code, ProviderErrorCode::ContentFilter);
    }

    #[tokio::test]
    async fn test_text_precedes_error_in_same_frame() {
        let frames: FrameStream<ProviderError> =
            Box::pin(futures::stream::iter(vec![Ok(serde_json::json!({"t": "last"}))]));
        let out: Vec<_> = fragments_from_frames(frames, |v| FrameOutcome {
            text: v["t"].as_str().map(str::to_string),
            error: Some(ProviderError::new("p", ProviderErrorCode::ContentFilter, "blocked")),
        })
        .collect()
        .await;

        assert_eq!(out[0].as_ref().unwrap(), "last");
        assert!(out[1].is_err());
    }
}
