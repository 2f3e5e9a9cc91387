//! Two-stage content moderation.
//!
//! 1. [`KeywordFilter`]: local, case-insensitive blocklist scan. The first
//!    matching keyword rejects the text.
//! 2. [`ModerationBackend`]: external moderation API, consulted only when
//!    stage 1 passed. A flagged verdict rejects the text and lists every
//!    flagged category. If the call itself fails the text is accepted
//!    (fail open) and the failure is logged at `error`.
//!
//! The moderator keeps no state between calls.
//!
//! ```rust
//! use ai_story_runtime::moderation::ContentModerator;
//!
//! # tokio_test::block_on(async {
//! let moderator = ContentModerator::local_only();
//! let verdict = moderator.check("평범한 하루였다.").await;
//! assert!(verdict.safe);
//! # });
//! ```

pub mod client;
pub mod keyword;

pub use client::{ModerationBackend, ModerationVerdict, OpenAiModeration};
pub use keyword::{BlockCategory, KeywordFilter, KeywordMatch};

use crate::config::RuntimeConfig;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationResult {
    pub safe: bool,
    pub reason: Option<String>,
}

impl ModerationResult {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct ContentModerator {
    keywords: KeywordFilter,
    backend: Option<Arc<dyn ModerationBackend>>,
}

impl ContentModerator {
    pub fn new(keywords: KeywordFilter, backend: Option<Arc<dyn ModerationBackend>>) -> Self {
        Self { keywords, backend }
    }

    /// Built-in blocklist, no external call.
    pub fn local_only() -> Self {
        Self::new(KeywordFilter::with_default_blocklist(), None)
    }

    /// Built-in blocklist plus the OpenAI moderation endpoint when moderation
    /// is enabled and an OpenAI key is available.
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let backend: Option<Arc<dyn ModerationBackend>> =
            if cfg.moderation.enabled && cfg.openai.api_key.is_some() {
                Some(Arc::new(OpenAiModeration::new(
                    &cfg.openai,
                    Duration::from_millis(cfg.moderation.timeout_ms),
                )?))
            } else {
                None
            };
        Ok(Self::new(KeywordFilter::with_default_blocklist(), backend))
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn check(&self, text: &str) -> ModerationResult {
        if let Some(m) = self.keywords.check(text) {
            warn!(keyword = %m.keyword, category = %m.category, "keyword filter blocked content");
            return ModerationResult::rejected(format!("blocked keyword detected: {}", m.keyword));
        }

        let Some(backend) = &self.backend else {
            return ModerationResult::safe();
        };

        match backend.moderate(text).await {
            Ok(verdict) if verdict.flagged => {
                let categories = verdict.categories.join(", ");
                warn!(categories = %categories, "moderation service flagged content");
                ModerationResult::rejected(format!("inappropriate content detected: {}", categories))
            }
            Ok(_) => ModerationResult::safe(),
            Err(e) => {
                error!(error = %e, error_code = %e.code, "moderation service failed, allowing content");
                ModerationResult::safe()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ProviderErrorCode;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        verdict: std::result::Result<ModerationVerdict, ProviderError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModerationBackend for ScriptedBackend {
        async fn moderate(
            &self,
            _text: &str,
        ) -> std::result::Result<ModerationVerdict, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn moderator(
        verdict: std::result::Result<ModerationVerdict, ProviderError>,
    ) -> (ContentModerator, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend {
            verdict,
            calls: AtomicUsize::new(0),
        });
        (
            ContentModerator::new(KeywordFilter::with_default_blocklist(), Some(backend.clone())),
            backend,
        )
    }

    #[tokio::test]
    async fn test_keyword_short_circuits_backend() {
        let (m, backend) = moderator(Ok(ModerationVerdict::default()));
        let result = m.check("그 영화는 포르노였다").await;
        assert!(!result.safe);
        assert_eq!(result.reason.as_deref(), Some("blocked keyword detected: 포르노"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flagged_lists_categories() {
        let (m, _) = moderator(Ok(ModerationVerdict {
            flagged: true,
            categories: vec!["harassment".into(), "violence".into()],
        }));
        let result = m.check("a calm story").await;
        assert!(!result.safe);
        assert_eq!(
            result.reason.as_deref(),
            Some("inappropriate content detected: harassment, violence")
        );
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open() {
        let (m, backend) = moderator(Err(ProviderError::new(
            "openai",
            ProviderErrorCode::ServerError,
            "HTTP 500",
        )));
        assert_eq!(m.check("a calm story").await, ModerationResult::safe());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_input_same_verdict() {
        let m = ContentModerator::local_only();
        let first = m.check("학살의 기록").await;
        let second = m.check("학살의 기록").await;
        assert!(!first.safe);
        assert_eq!(first, second);
    }
}
