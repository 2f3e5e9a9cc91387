//! # ai-story-runtime
//!
//! Resilient story generation over multiple LLM providers.
//!
//! ## Overview
//!
//! A story request flows through three layers:
//!
//! 1. [`StoryGenerator`] builds the prompt and runs the retry/validation loop
//!    (moderation gate, minimum word count, exponential backoff).
//! 2. [`FallbackOrchestrator`] walks the providers in priority order, guarded
//!    by a per-provider circuit breaker, and streams text back as it arrives.
//! 3. Provider adapters ([`providers::OpenAiAdapter`], [`providers::GeminiAdapter`])
//!    speak each vendor's streaming API.
//!
//! ## Key Features
//!
//! - **Streaming-First**: tokens reach the caller as they are produced
//! - **Fallback**: a failing provider hands over to the next one, recorded as a [`telemetry::FallbackEvent`]
//! - **Circuit Breaking**: CLOSED / OPEN / HALF_OPEN per provider
//! - **Moderation**: local keyword scan, then a fail-open external check
//! - **Cancellation**: dropping or cancelling a stream stops the provider request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_story_runtime::{RuntimeConfig, StoryEvent, StoryGenerator};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> ai_story_runtime::Result<()> {
//!     let config = RuntimeConfig::load(None)?;
//!     let generator = StoryGenerator::from_config(&config)?;
//!
//!     let tags = vec!["미스터리".to_string()];
//!     let mut stream = generator.generate_story("담백한 문장", &tags)?;
//!     while let Some(event) = stream.next().await {
//!         match event? {
//!             StoryEvent::Token { text } => print!("{}", text),
//!             StoryEvent::Completed { story } => println!("\n\n{}", story.title),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Layered runtime configuration (defaults, YAML, keyring, env) |
//! | [`generation`] | Story generator, retry loop, prompts, word counting |
//! | [`orchestrator`] | Provider fallback chain and event streams |
//! | [`providers`] | Provider adapter trait and the OpenAI / Gemini adapters |
//! | [`resilience`] | Per-provider circuit breaker registry |
//! | [`moderation`] | Keyword filter and external moderation client |
//! | [`pipeline`] | SSE and JSON-array frame decoders |
//! | [`transport`] | HTTP transport and error classification |
//! | [`telemetry`] | Bounded fallback event log |

pub mod config;
pub mod error_code;
pub mod generation;
pub mod moderation;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod telemetry;
pub mod transport;

pub use config::RuntimeConfig;
pub use error_code::ProviderErrorCode;
pub use generation::{GeneratedStory, RetryPolicy, RetryReason, StoryEvent, StoryGenerator, StoryStream};
pub use moderation::{ContentModerator, ModerationResult};
pub use orchestrator::{
    CancelHandle, FallbackOrchestrator, GenerationEvent, GenerationStream, ProviderHealth,
    ProviderStatus,
};
pub use providers::{Prompt, ProviderAdapter, ProviderError, StyleParameters};
pub use telemetry::FallbackEvent;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
