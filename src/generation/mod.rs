//! Story generation with retry and validation.
//!
//! # Retry/Validation Loop
//!
//! [`StoryGenerator::generate_story`] runs up to `max_attempts` attempts. Each
//! attempt invokes the [`FallbackOrchestrator`] once, forwarding tokens to the
//! caller while buffering them, and then validates the buffered text:
//!
//! | Check | Rejection reason |
//! |-------|------------------|
//! | content moderation | [`RetryReason::ModerationFailed`] |
//! | minimum word count | [`RetryReason::TooShort`] |
//! | orchestrator error | [`RetryReason::GenerationError`] |
//!
//! All rejections are handled alike: a [`StoryEvent::Retry`] tells the caller
//! that the tokens streamed so far are void, then the loop waits
//! `backoff_base × 2^(attempt-1)` and starts over. There is no wait after the
//! final attempt; exhausting the budget yields [`Error::GenerationFailed`].
//!
//! This loop is the only place that re-invokes the orchestrator.

pub mod prompt;
pub mod words;

pub use prompt::{DefaultPromptBuilder, PromptBuilder};
pub use words::{count_words, read_time_minutes};

use crate::config::RuntimeConfig;
use crate::moderation::ContentModerator;
use crate::orchestrator::stream::{emit, EventStream, TerminalEvent};
use crate::orchestrator::{FallbackOrchestrator, GenerationEvent};
use crate::providers::{Prompt, StyleParameters};
use crate::{Error, ErrorContext, Result};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Accepted number of tags per request.
pub const MIN_TAGS: usize = 1;
pub const MAX_TAGS: usize = 3;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each time.
    pub backoff_base: Duration,
    pub min_words: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            min_words: 1000,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // exponential backoff: base * 2^(attempt-1)
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryReason {
    ModerationFailed { reason: String },
    TooShort { word_count: usize },
    GenerationError { message: String },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModerationFailed { reason } => write!(f, "moderation failed: {}", reason),
            Self::TooShort { word_count } => write!(f, "story too short ({} words)", word_count),
            Self::GenerationError { message } => write!(f, "generation error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedStory {
    pub id: String,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub read_time_minutes: u32,
    pub tags: Vec<String>,
    /// Provider that produced the accepted text.
    pub provider: String,
    /// 1-based attempt that succeeded.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoryEvent {
    Token { text: String },
    /// Tokens since the last `Discard` or `Retry` came from a provider that
    /// failed mid-stream and must be dropped; generation continues.
    Discard { provider: String },
    /// The current attempt was rejected; all tokens of it must be dropped.
    Retry {
        attempt: u32,
        max_attempts: u32,
        reason: RetryReason,
    },
    Completed { story: GeneratedStory },
}

impl TerminalEvent for StoryEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

pub type StoryStream = EventStream<StoryEvent>;

struct AttemptText {
    content: String,
    provider: String,
}

#[derive(Clone)]
pub struct StoryGenerator {
    orchestrator: FallbackOrchestrator,
    moderator: Arc<ContentModerator>,
    prompts: Arc<dyn PromptBuilder>,
    policy: RetryPolicy,
    params: StyleParameters,
}

impl StoryGenerator {
    pub fn new(
        orchestrator: FallbackOrchestrator,
        moderator: Arc<ContentModerator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            moderator,
            prompts: Arc::new(DefaultPromptBuilder::default()),
            policy,
            params: StyleParameters::default(),
        }
    }

    /// Full stack from configuration: adapters, breakers, moderation and retry policy.
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let orchestrator = FallbackOrchestrator::from_config(cfg)?;
        let moderator = Arc::new(ContentModerator::from_config(cfg)?);
        Ok(Self::new(orchestrator, moderator, cfg.retry.clone()))
    }

    pub fn with_prompt_builder(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_style_parameters(mut self, params: StyleParameters) -> Self {
        self.params = params;
        self
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn validate_tags(tags: &[String]) -> Result<Vec<String>> {
        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.len() < MIN_TAGS || tags.len() > MAX_TAGS {
            return Err(Error::validation_with_context(
                format!("expected {} to {} tags", MIN_TAGS, MAX_TAGS),
                ErrorContext::new()
                    .with_field_path("tags")
                    .with_details(format!("got {}", tags.len()))
                    .with_source("story_generator"),
            ));
        }
        Ok(tags)
    }

    /// Start a story. Tag validation happens before anything is spawned.
    pub fn generate_story(&self, system_style: &str, tags: &[String]) -> Result<StoryStream> {
        let tags = Self::validate_tags(tags)?;
        let prompt = self.prompts.build(system_style, &tags);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let this = self.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            if let Err(e) = this.run(prompt, tags, &tx, &task_token).await {
                if !matches!(e, Error::Cancelled) {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(StoryStream::new(rx, token))
    }

    /// Drive a story to completion and return only the final result.
    pub async fn generate_story_text(
        &self,
        system_style: &str,
        tags: &[String],
    ) -> Result<GeneratedStory> {
        let mut stream = self.generate_story(system_style, tags)?;
        while let Some(event) = stream.next().await {
            if let StoryEvent::Completed { story } = event? {
                return Ok(story);
            }
        }
        Err(Error::Cancelled)
    }

    async fn run(
        &self,
        prompt: Prompt,
        tags: Vec<String>,
        tx: &mpsc::Sender<Result<StoryEvent>>,
        token: &CancellationToken,
    ) -> Result<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_reason = String::new();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let reason = match self.attempt(&prompt, tx, token).await {
                Ok(text) => match self.validate(&text.content).await {
                    Ok(word_count) => {
                        let title = self.orchestrator.generate_title(&text.content).await;
                        let story = GeneratedStory {
                            id: uuid::Uuid::new_v4().to_string(),
                            title,
                            word_count,
                            read_time_minutes: read_time_minutes(word_count),
                            content: text.content,
                            tags,
                            provider: text.provider,
                            attempts: attempt,
                        };
                        info!(
                            story_id = %story.id,
                            provider = %story.provider,
                            word_count,
                            attempt,
                            "story generated"
                        );
                        return emit(tx, token, StoryEvent::Completed { story }).await;
                    }
                    Err(reason) => {
                        last_error = None;
                        reason
                    }
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    let reason = RetryReason::GenerationError {
                        message: e.to_string(),
                    };
                    last_error = Some(Box::new(e));
                    reason
                }
            };

            warn!(attempt, max_attempts, reason = %reason, "story attempt rejected");
            last_reason = reason.to_string();

            if attempt < max_attempts {
                emit(
                    tx,
                    token,
                    StoryEvent::Retry {
                        attempt,
                        max_attempts,
                        reason,
                    },
                )
                .await?;

                let delay = self.policy.backoff_delay(attempt);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(Error::GenerationFailed {
            attempts: max_attempts,
            last_reason,
            last_error,
        })
    }

    /// One orchestrator run: forward tokens, return the buffered text.
    async fn attempt(
        &self,
        prompt: &Prompt,
        tx: &mpsc::Sender<Result<StoryEvent>>,
        token: &CancellationToken,
    ) -> Result<AttemptText> {
        let mut generation = self.orchestrator.generate(prompt.clone(), self.params.clone());
        let mut content = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                item = generation.next() => item,
            };
            match next {
                Some(Ok(GenerationEvent::Fragment { text })) => {
                    content.push_str(&text);
                    emit(tx, token, StoryEvent::Token { text }).await?;
                }
                Some(Ok(GenerationEvent::Discard { provider })) => {
                    content.clear();
                    emit(tx, token, StoryEvent::Discard { provider }).await?;
                }
                Some(Ok(GenerationEvent::Completed { provider })) => {
                    return Ok(AttemptText { content, provider });
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Error::Cancelled),
            }
        }
    }

    /// Word count on success, the rejection otherwise.
    async fn validate(&self, content: &str) -> std::result::Result<usize, RetryReason> {
        let moderation = self.moderator.check(content).await;
        if !moderation.safe {
            return Err(RetryReason::ModerationFailed {
                reason: moderation.reason.unwrap_or_default(),
            });
        }
        let word_count = count_words(content);
        if word_count < self.policy.min_words {
            return Err(RetryReason::TooShort { word_count });
        }
        Ok(word_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_tag_bounds() {
        assert!(StoryGenerator::validate_tags(&[]).is_err());
        assert!(StoryGenerator::validate_tags(&["  ".to_string()]).is_err());
        let four: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let err = StoryGenerator::validate_tags(&four).unwrap_err();
        assert_eq!(err.context().unwrap().field_path.as_deref(), Some("tags"));
        assert_eq!(
            StoryGenerator::validate_tags(&[" 반전 ".to_string()]).unwrap(),
            vec!["반전".to_string()]
        );
    }

    #[test]
    fn test_retry_reason_serialization() {
        let json = serde_json::to_value(StoryEvent::Retry {
            attempt: 1,
            max_attempts: 3,
            reason: RetryReason::TooShort { word_count: 420 },
        })
        .unwrap();
        assert_eq!(json["type"], "retry");
        assert_eq!(json["reason"]["kind"], "too_short");
        assert_eq!(json["reason"]["word_count"], 420);
    }
}
