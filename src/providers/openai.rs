//! OpenAI chat-completions adapter.
//!
//! Streaming uses SSE (`data: {...}` envelopes terminated by `data: [DONE]`);
//! each chunk carries `choices[0].delta.content`. A `finish_reason` of
//! `content_filter` or an in-stream `error` object ends the stream with a
//! classified [`ProviderError`].

use super::{
    fragments_from_frames, title_excerpt, FragmentStream, FrameOutcome, Prompt, ProviderAdapter,
    ProviderDescriptor, ProviderError, StyleParameters,
};
use crate::config::ProviderSettings;
use crate::error_code::ProviderErrorCode;
use crate::pipeline::{Decoder, SseDecoder};
use crate::transport::{AuthScheme, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info};

const CHAT_PATH: &str = "/v1/chat/completions";
const MODELS_PATH: &str = "/v1/models";

pub(crate) const TITLE_INSTRUCTION: &str = "You name short stories. Reply with one title of at most \
10 characters, in the language of the story, and nothing else.";

pub struct OpenAiAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
}

impl OpenAiAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let transport = HttpTransport::new(
            &settings.name,
            &settings.base_url,
            settings.api_key.clone(),
            settings.timeout(),
            AuthScheme::Bearer,
        )?;
        Ok(Self {
            descriptor: ProviderDescriptor {
                name: settings.name.clone(),
                priority: settings.priority,
                enabled: settings.is_active(),
                supports_streaming: true,
                timeout: settings.timeout(),
                model: settings.model.clone(),
            },
            transport,
        })
    }

    pub fn build_request(&self, prompt: &Prompt, params: &StyleParameters) -> Value {
        json!({
            "model": self.descriptor.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "presence_penalty": params.presence_penalty,
            "frequency_penalty": params.frequency_penalty,
            "top_p": params.top_p,
            "stream": true,
        })
    }

    fn build_title_request(&self, text: &str) -> Value {
        json!({
            "model": self.descriptor.model,
            "messages": [
                { "role": "system", "content": TITLE_INSTRUCTION },
                { "role": "user", "content": title_excerpt(text) },
            ],
            "temperature": 0.8,
            "max_tokens": 50,
        })
    }
}

/// Interpret one streamed chat-completion chunk.
pub(crate) fn chunk_outcome(provider: &str, chunk: &Value) -> FrameOutcome {
    if let Some(err) = chunk.get("error") {
        let code = ["code", "type"]
            .iter()
            .filter_map(|k| err.get(*k).and_then(|v| v.as_str()))
            .find_map(ProviderErrorCode::from_provider_code)
            .unwrap_or(ProviderErrorCode::Unknown);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("stream error");
        return FrameOutcome {
            text: None,
            error: Some(ProviderError::new(provider, code, message)),
        };
    }

    let choice = chunk.pointer("/choices/0");
    let text = choice
        .and_then(|c| c.pointer("/delta/content"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let error = match choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|v| v.as_str())
    {
        Some("content_filter") => Some(ProviderError::new(
            provider,
            ProviderErrorCode::ContentFilter,
            "content blocked by provider filter",
        )),
        _ => None,
    };
    FrameOutcome { text, error }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn stream_generate(
        &self,
        prompt: &Prompt,
        params: &StyleParameters,
    ) -> std::result::Result<FragmentStream, ProviderError> {
        let body = self.build_request(prompt, params);
        let req = self
            .transport
            .request(Method::POST, CHAT_PATH)?
            .header("accept", "text/event-stream")
            .json(&body);

        info!(provider = %self.descriptor.name, model = %self.descriptor.model, "stream started");
        let started = Instant::now();
        let resp = self.transport.send(req).await?;
        let frames = SseDecoder::default().decode_stream(self.transport.byte_stream(resp));

        let provider = self.descriptor.name.clone();
        let mut first_token = true;
        Ok(fragments_from_frames(frames, move |chunk| {
            let outcome = chunk_outcome(&provider, chunk);
            if first_token && outcome.text.as_deref().is_some_and(|t| !t.is_empty()) {
                first_token = false;
                debug!(
                    provider = %provider,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "first token"
                );
            }
            outcome
        }))
    }

    async fn try_generate_title(&self, text: &str) -> std::result::Result<String, ProviderError> {
        let req = self
            .transport
            .request(Method::POST, CHAT_PATH)?
            .json(&self.build_title_request(text));
        let resp = self.transport.send(req).await?;
        let body: Value = resp.json().await.map_err(|e| {
            crate::transport::classify_reqwest_error(&self.descriptor.name, e)
        })?;

        let title = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        debug!(provider = %self.descriptor.name, title = %title, "title generated");
        Ok(title)
    }

    async fn health_check(&self) -> bool {
        self.transport.probe(MODELS_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(&ProviderSettings::openai().with_api_key("sk-test")).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let body = adapter().build_request(&Prompt::new("sys", "usr"), &StyleParameters::default());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["stream"], true);
        assert!((body["presence_penalty"].as_f64().unwrap() - 0.6).abs() < 1e-6);
        assert!((body["frequency_penalty"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_active_only_with_key() {
        assert!(adapter().descriptor().enabled);
        let keyless = OpenAiAdapter::new(&ProviderSettings::openai()).unwrap();
        assert!(!keyless.descriptor().enabled);
    }

    #[test]
    fn test_chunk_delta() {
        let chunk = json!({"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]});
        let out = chunk_outcome("openai", &chunk);
        assert_eq!(out.text.as_deref(), Some("Hello"));
        assert!(out.error.is_none());
    }

    #[test]
    fn test_chunk_content_filter() {
        let chunk = json!({"choices":[{"delta":{},"finish_reason":"content_filter"}]});
        let out = chunk_outcome("openai", &chunk);
        let err = out.error.unwrap();
        assert_eq!(err.code, ProviderErrorCode::ContentFilter);
        assert!(err.retryable);
    }

    #[test]
    fn test_chunk_error_object() {
        let chunk = json!({"error":{"message":"overloaded","type":"server_error"}});
        let out = chunk_outcome("openai", &chunk);
        assert_eq!(out.error.unwrap().code, ProviderErrorCode::ServerError);
    }
}
