//! Shared fixtures: scripted provider adapters with no network behind them.

#![allow(dead_code)]

use ai_story_runtime::error_code::ProviderErrorCode;
use ai_story_runtime::providers::{FragmentStream, ProviderDescriptor};
use ai_story_runtime::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use ai_story_runtime::{FallbackOrchestrator, Prompt, ProviderAdapter, ProviderError, StyleParameters};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What one `stream_generate` call does.
#[derive(Clone)]
pub enum Script {
    /// Yield the fragments, then end normally.
    Fragments(Vec<&'static str>),
    /// Fail before any fragment.
    FailFast(ProviderErrorCode),
    /// Yield the fragments, then fail.
    FailAfter(Vec<&'static str>, ProviderErrorCode),
    /// Yield the fragments, then never finish.
    Hang(Vec<&'static str>),
    /// End immediately with no fragments.
    Empty,
}

pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    /// Front entry is used per call; the last one repeats.
    scripts: Mutex<VecDeque<Script>>,
    title: Result<String, ProviderErrorCode>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, priority: u32, scripts: Vec<Script>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name: name.to_string(),
                priority,
                enabled: true,
                supports_streaming: true,
                timeout: Duration::from_secs(30),
                model: format!("{}-model", name),
            },
            scripts: Mutex::new(scripts.into()),
            title: Err(ProviderErrorCode::ServerError),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Ok(title.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.descriptor.enabled = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or(Script::Empty)
        }
    }

    fn error(&self, code: ProviderErrorCode) -> ProviderError {
        ProviderError::new(&self.descriptor.name, code, format!("scripted {}", code))
    }
}

fn fragments(texts: Vec<&'static str>) -> impl futures::Stream<Item = Result<String, ProviderError>> {
    futures::stream::iter(texts.into_iter().map(|t| Ok(t.to_string())))
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn stream_generate(
        &self,
        _prompt: &Prompt,
        _params: &StyleParameters,
    ) -> Result<FragmentStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        Ok(match self.next_script() {
            Script::Fragments(texts) => fragments(texts).boxed(),
            Script::FailFast(code) => return Err(self.error(code)),
            Script::FailAfter(texts, code) => fragments(texts)
                .chain(futures::stream::once(futures::future::ready(Err(self.error(code)))))
                .boxed(),
            Script::Hang(texts) => fragments(texts).chain(futures::stream::pending()).boxed(),
            Script::Empty => futures::stream::empty().boxed(),
        })
    }

    async fn try_generate_title(&self, _text: &str) -> Result<String, ProviderError> {
        match &self.title {
            Ok(title) => Ok(title.clone()),
            Err(code) => Err(self.error(*code)),
        }
    }
}

pub fn registry(failure_threshold: u32) -> Arc<CircuitBreakerRegistry> {
    Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::new()
            .with_failure_threshold(failure_threshold)
            .with_reset_timeout(Duration::from_secs(30)),
    ))
}

pub fn orchestrator(
    providers: &[Arc<ScriptedProvider>],
    breakers: Arc<CircuitBreakerRegistry>,
) -> FallbackOrchestrator {
    let adapters: Vec<Arc<dyn ProviderAdapter>> = providers
        .iter()
        .map(|p| p.clone() as Arc<dyn ProviderAdapter>)
        .collect();
    FallbackOrchestrator::new(adapters, breakers).unwrap()
}

pub fn prompt() -> Prompt {
    Prompt::new("system", "user")
}
