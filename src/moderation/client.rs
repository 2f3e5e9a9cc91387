//! External moderation API (second moderation stage).

use crate::config::ProviderSettings;
use crate::providers::ProviderError;
use crate::transport::{classify_reqwest_error, AuthScheme, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const MODERATIONS_PATH: &str = "/v1/moderations";

/// Verdict of an external moderation service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub flagged: bool,
    /// Flagged category names, sorted.
    pub categories: Vec<String>,
}

#[async_trait]
pub trait ModerationBackend: Send + Sync {
    async fn moderate(&self, text: &str) -> std::result::Result<ModerationVerdict, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationEntry>,
}

#[derive(Debug, Deserialize)]
struct ModerationEntry {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
}

/// OpenAI `/v1/moderations` client.
pub struct OpenAiModeration {
    transport: HttpTransport,
}

impl OpenAiModeration {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Result<Self> {
        let transport = HttpTransport::new(
            &settings.name,
            &settings.base_url,
            settings.api_key.clone(),
            timeout,
            AuthScheme::Bearer,
        )?;
        Ok(Self { transport })
    }
}

#[async_trait]
impl ModerationBackend for OpenAiModeration {
    async fn moderate(&self, text: &str) -> std::result::Result<ModerationVerdict, ProviderError> {
        let req = self
            .transport
            .request(Method::POST, MODERATIONS_PATH)?
            .json(&serde_json::json!({ "input": text }));
        let resp = self.transport.send(req).await?;
        let body: ModerationResponse = resp
            .json()
            .await
            .map_err(|e| classify_reqwest_error(self.transport.provider(), e))?;

        let Some(entry) = body.results.into_iter().next() else {
            return Ok(ModerationVerdict::default());
        };
        let categories = entry
            .categories
            .into_iter()
            .filter_map(|(name, hit)| hit.then_some(name))
            .collect();
        Ok(ModerationVerdict {
            flagged: entry.flagged,
            categories,
        })
    }
}
