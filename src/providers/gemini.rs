//! Google Gemini adapter.
//!
//! Key differences from chat-completions backends:
//! - The API key travels as a `?key=` query parameter.
//! - No system role: the system prompt is folded into the single user turn.
//! - `generationConfig` wraps sampling parameters (`maxOutputTokens`, `topK`, ...).
//! - `streamGenerateContent` returns a JSON array streamed piecewise; each
//!   element has the shape `candidates[0].content.parts[].text`.
//! - A `finishReason` of `SAFETY` means the output was blocked.

use super::{
    fragments_from_frames, title_excerpt, FragmentStream, FrameOutcome, Prompt, ProviderAdapter,
    ProviderDescriptor, ProviderError, StyleParameters,
};
use crate::config::ProviderSettings;
use crate::error_code::ProviderErrorCode;
use crate::pipeline::{Decoder, JsonArrayDecoder};
use crate::providers::openai::TITLE_INSTRUCTION;
use crate::transport::{AuthScheme, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MODELS_PATH: &str = "/v1beta/models";
const TITLE_TIMEOUT: Duration = Duration::from_secs(10);
const PROMPT_SEPARATOR: &str = "\n\n---\n\n";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
}

impl GeminiAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let transport = HttpTransport::new(
            &settings.name,
            &settings.base_url,
            settings.api_key.clone(),
            settings.timeout(),
            AuthScheme::QueryKey,
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

    fn model_path(&self, method: &str) -> String {
        format!("/v1beta/models/{}:{}", self.descriptor.model, method)
    }

    pub fn build_request(&self, prompt: &Prompt, params: &StyleParameters) -> Value {
        let safety_settings: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|c| json!({ "category": c, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect();

        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{}{}{}", prompt.system, PROMPT_SEPARATOR, prompt.user) }],
            }],
            "generationConfig": {
                "temperature": params.temperature,
                "topK": params.top_k,
                "topP": params.top_p,
                "maxOutputTokens": params.max_tokens,
            },
            "safetySettings": safety_settings,
        })
    }

    fn build_title_request(&self, text: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{}\n\n{}", TITLE_INSTRUCTION, title_excerpt(text)) }],
            }],
            "generationConfig": {
                "temperature": 0.8,
                "maxOutputTokens": 50,
            },
        })
    }
}

fn candidate_text(chunk: &Value) -> Option<String> {
    let parts = chunk.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}

/// Interpret one element of the streamed response array.
pub(crate) fn chunk_outcome(provider: &str, chunk: &Value) -> FrameOutcome {
    if let Some(err) = chunk.get("error") {
        let code = err
            .get("status")
            .and_then(|s| s.as_str())
            .and_then(ProviderErrorCode::from_provider_code)
            .or_else(|| {
                err.get("code")
                    .and_then(|c| c.as_u64())
                    .map(|c| ProviderErrorCode::from_http_status(c as u16))
            })
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

    let blocked_prompt = chunk
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
        .is_some();
    let blocked_output = chunk
        .pointer("/candidates/0/finishReason")
        .and_then(|v| v.as_str())
        == Some("SAFETY");

    let error = (blocked_prompt || blocked_output).then(|| {
        ProviderError::new(
            provider,
            ProviderErrorCode::ContentFilter,
            "content blocked by safety filters",
        )
    });
    FrameOutcome {
        text: candidate_text(chunk),
        error,
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn stream_generate(
        &self,
        prompt: &Prompt,
        params: &StyleParameters,
    ) -> std::result::Result<FragmentStream, ProviderError> {
        let req = self
            .transport
            .request(Method::POST, &self.model_path("streamGenerateContent"))?
            .json(&self.build_request(prompt, params));

        info!(provider = %self.descriptor.name, model = %self.descriptor.model, "stream started");
        let started = Instant::now();
        let resp = self.transport.send(req).await?;
        let frames = JsonArrayDecoder.decode_stream(self.transport.byte_stream(resp));

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
            .request(Method::POST, &self.model_path("generateContent"))?
            .timeout(TITLE_TIMEOUT)
            .json(&self.build_title_request(text));
        let resp = self.transport.send(req).await?;
        let body: Value = resp.json().await.map_err(|e| {
            crate::transport::classify_reqwest_error(&self.descriptor.name, e)
        })?;

        let title = candidate_text(&body).unwrap_or_default();
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

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(
            &ProviderSettings::gemini()
                .with_api_key("g-test")
                .with_enabled(true),
        )
        .unwrap()
    }

    #[test]
    fn test_request_shape() {
        let body = adapter().build_request(&Prompt::new("sys", "usr"), &StyleParameters::default());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "sys\n\n---\n\nusr");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4000);
        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety
            .iter()
            .all(|s| s["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
    }

    #[test]
    fn test_model_path() {
        assert_eq!(
            adapter().model_path("streamGenerateContent"),
            "/v1beta/models/gemini-2.0-flash:streamGenerateContent"
        );
    }

    #[test]
    fn test_disabled_by_default() {
        let a = GeminiAdapter::new(&ProviderSettings::gemini().with_api_key("g")).unwrap();
        assert!(!a.descriptor().enabled);
    }

    #[test]
    fn test_safety_after_text() {
        let chunk = json!({"candidates":[{"content":{"parts":[{"text":"끝"}]},"finishReason":"SAFETY"}]});
        let out = chunk_outcome("gemini", &chunk);
        assert_eq!(out.text.as_deref(), Some("끝"));
        let err = out.error.unwrap();
        assert_eq!(err.code, ProviderErrorCode::ContentFilter);
        assert!(err.retryable);
    }

    #[test]
    fn test_error_element() {
        let chunk = json!({"error":{"code":503,"message":"overloaded","status":"UNAVAILABLE"}});
        let out = chunk_outcome("gemini", &chunk);
        assert_eq!(out.error.unwrap().code, ProviderErrorCode::ServerError);
    }
}
