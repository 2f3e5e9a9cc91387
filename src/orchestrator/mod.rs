//! Fallback orchestration across providers.
//!
//! # Fallback Orchestrator
//!
//! Providers are tried strictly one after another, in ascending priority.
//! For each provider:
//!
//! 1. Ask the [`CircuitBreakerRegistry`]; a closed gate skips the provider silently.
//! 2. Stream its fragments straight through to the caller.
//! 3. On completion with at least one fragment, record a success and stop.
//! 4. On a [`ProviderError`], record a failure, log a [`FallbackEvent`] and
//!    either abort (non-retryable) or move on to the next provider.
//!
//! An empty stream without error is not a failure: the provider is skipped
//! and its half-open probe, if any, is handed back. Cancellation is neutral
//! in the same way.
//!
//! When every provider has been tried the caller gets
//! [`Error::AllProvidersFailed`] with the attempted names and their causes.
//!
//! ## Streaming
//!
//! [`FallbackOrchestrator::generate`] spawns the provider loop on the tokio
//! runtime and returns a [`GenerationStream`] fed through a bounded channel.
//! Fragments of a provider that fails mid-stream are followed by a
//! [`GenerationEvent::Discard`] so consumers can drop them.

pub mod stream;

pub use stream::{CancelHandle, EventStream, GenerationEvent, GenerationStream, TerminalEvent};

use stream::emit;

use crate::config::RuntimeConfig;
use crate::error_code::ProviderErrorCode;
use crate::providers::{
    normalize_title, GeminiAdapter, OpenAiAdapter, Prompt, ProviderAdapter, ProviderError,
    StyleParameters, DEFAULT_TITLE,
};
use crate::resilience::circuit_breaker::{Admission, CircuitBreakerRegistry, CircuitState};
use crate::telemetry::{FallbackEvent, FallbackEventLog, DEFAULT_EVENT_CAPACITY, NO_PROVIDER};
use crate::{Error, ErrorContext, Result};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Observability snapshot of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub circuit_state: CircuitState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub healthy: bool,
}

enum StreamOutcome {
    Completed { fragments: usize },
    Empty,
    Cancelled,
    Failed { error: ProviderError, yielded: bool },
}

#[derive(Clone)]
pub struct FallbackOrchestrator {
    /// Enabled providers, ascending priority.
    active: Arc<Vec<Arc<dyn ProviderAdapter>>>,
    /// Every registered provider, ascending priority.
    registered: Arc<Vec<Arc<dyn ProviderAdapter>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    events: Arc<FallbackEventLog>,
}

impl FallbackOrchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.name().to_string()) {
                return Err(Error::configuration_with_context(
                    format!("provider '{}' registered twice", adapter.name()),
                    ErrorContext::new()
                        .with_field_path("providers")
                        .with_source("fallback_orchestrator"),
                ));
            }
        }

        let mut registered = adapters;
        registered.sort_by_key(|a| a.descriptor().priority);
        let active: Vec<_> = registered
            .iter()
            .filter(|a| a.descriptor().enabled)
            .cloned()
            .collect();

        let names: Vec<&str> = active.iter().map(|a| a.name()).collect();
        if active.is_empty() {
            warn!("no provider enabled, every generation will fail");
        } else {
            info!(providers = ?names, "fallback chain ready");
        }

        Ok(Self {
            active: Arc::new(active),
            registered: Arc::new(registered),
            breakers,
            events: Arc::new(FallbackEventLog::new(DEFAULT_EVENT_CAPACITY)),
        })
    }

    /// OpenAI and Gemini adapters plus a registry, all from `cfg`.
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(OpenAiAdapter::new(&cfg.openai)?),
            Arc::new(GeminiAdapter::new(&cfg.gemini)?),
        ];
        let breakers = Arc::new(CircuitBreakerRegistry::new(cfg.circuit_breaker.clone()));
        Self::new(adapters, breakers)
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn events(&self) -> &Arc<FallbackEventLog> {
        &self.events
    }

    /// Names of the enabled providers in the order they are tried.
    pub fn provider_names(&self) -> Vec<String> {
        self.active.iter().map(|a| a.name().to_string()).collect()
    }

    /// Start a generation on the current tokio runtime.
    pub fn generate(&self, prompt: Prompt, params: StyleParameters) -> GenerationStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let this = self.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            if let Err(e) = this.run_chain(&prompt, &params, &tx, &task_token).await {
                if !matches!(e, Error::Cancelled) {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        GenerationStream::new(rx, token)
    }

    async fn run_chain(
        &self,
        prompt: &Prompt,
        params: &StyleParameters,
        tx: &mpsc::Sender<Result<GenerationEvent>>,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut attempted = Vec::new();
        let mut causes = Vec::new();

        for (idx, provider) in self.active.iter().enumerate() {
            let name = provider.name();
            let admission = self.breakers.admit(name);
            if !admission.is_allowed() {
                debug!(provider = name, "circuit open, skipping provider");
                continue;
            }
            attempted.push(name.to_string());

            let started = Instant::now();
            match self.stream_one(provider.as_ref(), prompt, params, tx, token).await {
                StreamOutcome::Completed { fragments } => {
                    self.breakers.record_success(name);
                    info!(
                        provider = name,
                        fragments,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "stream completed"
                    );
                    emit(tx, token, GenerationEvent::Completed {
                        provider: name.to_string(),
                    })
                    .await?;
                    return Ok(());
                }
                StreamOutcome::Empty => {
                    if admission == Admission::Probe {
                        self.breakers.release_probe(name);
                    }
                    warn!(provider = name, "provider returned an empty stream, trying next provider");
                    causes.push(ProviderError::new(
                        name,
                        ProviderErrorCode::Unknown,
                        "empty stream",
                    ));
                }
                StreamOutcome::Cancelled => {
                    if admission == Admission::Probe {
                        self.breakers.release_probe(name);
                    }
                    info!(provider = name, "generation cancelled");
                    return Err(Error::Cancelled);
                }
                StreamOutcome::Failed { error, yielded } => {
                    self.breakers
                        .record_failure(name, Some(&error as &(dyn std::error::Error + 'static)));
                    if yielded {
                        emit(tx, token, GenerationEvent::Discard {
                            provider: name.to_string(),
                        })
                        .await?;
                    }

                    let to = self.next_available_after(idx);
                    warn!(
                        provider = name,
                        next_provider = %to,
                        error_code = %error.code,
                        retryable = error.retryable,
                        error = %error.message,
                        "provider failed"
                    );
                    self.events.push(FallbackEvent::new(
                        name,
                        to,
                        error.message.clone(),
                        error.code,
                    ));

                    if !error.retryable {
                        return Err(Error::Provider(error));
                    }
                    causes.push(error);
                }
            }
        }

        warn!(attempted = ?attempted, "all providers failed");
        Err(Error::AllProvidersFailed { attempted, causes })
    }

    async fn stream_one(
        &self,
        provider: &dyn ProviderAdapter,
        prompt: &Prompt,
        params: &StyleParameters,
        tx: &mpsc::Sender<Result<GenerationEvent>>,
        token: &CancellationToken,
    ) -> StreamOutcome {
        let started = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            r = provider.stream_generate(prompt, params) => r,
        };
        let mut fragments = match started {
            Ok(s) => s,
            Err(error) => {
                return StreamOutcome::Failed {
                    error,
                    yielded: false,
                }
            }
        };

        let mut count = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return StreamOutcome::Cancelled,
                item = fragments.next() => item,
            };
            match next {
                None if count == 0 => return StreamOutcome::Empty,
                None => return StreamOutcome::Completed { fragments: count },
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    count += 1;
                    if emit(tx, token, GenerationEvent::Fragment { text }).await.is_err() {
                        return StreamOutcome::Cancelled;
                    }
                }
                Some(Err(error)) => {
                    return StreamOutcome::Failed {
                        error,
                        yielded: count > 0,
                    }
                }
            }
        }
    }

    /// First provider after `idx` whose circuit would currently admit a request.
    fn next_available_after(&self, idx: usize) -> String {
        self.active
            .iter()
            .skip(idx + 1)
            .find(|p| self.breakers.is_available(p.name()))
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| NO_PROVIDER.to_string())
    }

    /// Title from the first provider that answers; never fails.
    pub async fn generate_title(&self, text: &str) -> String {
        for provider in self.active.iter() {
            match provider.try_generate_title(text).await {
                Ok(raw) => return normalize_title(&raw),
                Err(e) => {
                    debug!(provider = provider.name(), error = %e, "title attempt failed, trying next provider");
                }
            }
        }
        DEFAULT_TITLE.to_string()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.registered
            .iter()
            .map(|p| {
                let d = p.descriptor();
                let stats = self.breakers.stats(&d.name);
                ProviderStatus {
                    name: d.name.clone(),
                    enabled: d.enabled,
                    priority: d.priority,
                    circuit_state: stats.state,
                    total_requests: stats.total_requests,
                    total_failures: stats.total_failures,
                    total_successes: stats.total_successes,
                }
            })
            .collect()
    }

    /// Up to `limit` most recent fallback events, oldest first.
    pub fn recent_fallback_events(&self, limit: usize) -> Vec<FallbackEvent> {
        self.events.recent(limit)
    }

    pub fn reset_all_circuits(&self) {
        self.breakers.reset_all();
    }

    /// Probe every enabled provider concurrently. Advisory; circuits are untouched.
    pub async fn health_check_all(&self) -> Vec<ProviderHealth> {
        let checks = self.active.iter().map(|p| async move {
            ProviderHealth {
                name: p.name().to_string(),
                healthy: p.health_check().await,
            }
        });
        futures::future::join_all(checks).await
    }
}
