//! Runtime configuration.
//!
//! Read once at startup. Values come from, in increasing precedence: built-in
//! defaults, an optional YAML file, the OS keyring (API keys only, when the
//! file gives none), then environment variables. A non-blank
//! `<PROVIDER>_API_KEY` always wins.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OPENAI_API_KEY` / `OPENAI_MODEL` / `OPENAI_TIMEOUT_MS` / `OPENAI_BASE_URL` | – / `gpt-4o-mini` / `60000` / `https://api.openai.com` |
//! | `GEMINI_API_KEY` / `GEMINI_ENABLED` / `GEMINI_MODEL` / `GEMINI_TIMEOUT_MS` / `GEMINI_BASE_URL` | – / `false` / `gemini-2.0-flash` / `45000` / `https://generativelanguage.googleapis.com` |
//! | `AI_CIRCUIT_FAILURE_THRESHOLD` / `AI_CIRCUIT_RESET_TIMEOUT_MS` | `5` / `30000` |
//! | `AI_CIRCUIT_HALF_OPEN_REQUESTS` / `AI_CIRCUIT_MONITORING_WINDOW_MS` | `1` / `60000` |
//! | `AI_MODERATION_ENABLED` | `true` |
//! | `AI_STORY_MIN_WORDS` / `AI_STORY_MAX_ATTEMPTS` / `AI_STORY_BACKOFF_BASE_MS` | `1000` / `3` / `1000` |
//!
//! ```yaml
//! openai:
//!   model: gpt-4o
//! gemini:
//!   enabled: true
//!   timeout_ms: 30000
//! circuit_breaker:
//!   failure_threshold: 3
//! story:
//!   min_words: 800
//! ```

use crate::generation::RetryPolicy;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const OPENAI: &str = "openai";
pub const GEMINI: &str = "gemini";

/// Concrete settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSettings {
    pub name: String,
    /// Operator switch. The provider is only active if a key is present too.
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
    pub base_url: String,
    pub priority: u32,
}

impl ProviderSettings {
    pub fn openai() -> Self {
        Self {
            name: OPENAI.to_string(),
            enabled: true,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 60_000,
            base_url: "https://api.openai.com".to_string(),
            priority: 1,
        }
    }

    pub fn gemini() -> Self {
        Self {
            name: GEMINI.to_string(),
            enabled: false,
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            timeout_ms: 45_000,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            priority: 2,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Enabled and holding an API key.
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationSettings {
    pub enabled: bool,
    /// Timeout of the external moderation call.
    pub timeout_ms: u64,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub openai: ProviderSettings,
    pub gemini: ProviderSettings,
    pub circuit_breaker: CircuitBreakerConfig,
    pub moderation: ModerationSettings,
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            openai: ProviderSettings::openai(),
            gemini: ProviderSettings::gemini(),
            circuit_breaker: CircuitBreakerConfig::default(),
            moderation: ModerationSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProviderOverrides {
    enabled: Option<bool>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_ms: Option<u64>,
    base_url: Option<String>,
    priority: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CircuitOverrides {
    failure_threshold: Option<u32>,
    reset_timeout_ms: Option<u64>,
    half_open_requests: Option<u32>,
    monitoring_window_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModerationOverrides {
    enabled: Option<bool>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StoryOverrides {
    min_words: Option<usize>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    openai: ProviderOverrides,
    gemini: ProviderOverrides,
    circuit_breaker: CircuitOverrides,
    moderation: ModerationOverrides,
    story: StoryOverrides,
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid value for {}", name),
                ErrorContext::new()
                    .with_field_path(name)
                    .with_details(format!("'{}': {}", raw, e))
                    .with_source("env"),
            )
        }),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<bool>> {
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::configuration_with_context(
                format!("invalid boolean for {}", name),
                ErrorContext::new()
                    .with_field_path(name)
                    .with_details(format!("'{}'", v))
                    .with_source("env"),
            )),
        },
    }
}

fn apply_provider_overrides(settings: &mut ProviderSettings, o: ProviderOverrides) {
    if let Some(v) = o.enabled {
        settings.enabled = v;
    }
    if let Some(v) = o.api_key.filter(|k| !k.trim().is_empty()) {
        settings.api_key = Some(v);
    }
    if let Some(v) = o.model {
        settings.model = v;
    }
    if let Some(v) = o.timeout_ms {
        settings.timeout_ms = v;
    }
    if let Some(v) = o.base_url {
        settings.base_url = v;
    }
    if let Some(v) = o.priority {
        settings.priority = v;
    }
}

fn apply_provider_env(
    settings: &mut ProviderSettings,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let prefix = settings.name.to_uppercase();
    if let Some(v) = lookup(&format!("{}_API_KEY", prefix)).filter(|k| !k.trim().is_empty()) {
        settings.api_key = Some(v);
    }
    if let Some(v) = lookup(&format!("{}_MODEL", prefix)).filter(|v| !v.trim().is_empty()) {
        settings.model = v;
    }
    if let Some(v) = parse_var(lookup, &format!("{}_TIMEOUT_MS", prefix))? {
        settings.timeout_ms = v;
    }
    if let Some(v) = lookup(&format!("{}_BASE_URL", prefix)).filter(|v| !v.trim().is_empty()) {
        settings.base_url = v;
    }
    Ok(())
}

impl RuntimeConfig {
    /// Defaults, then `path` (if any), then the keyring, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            cfg.apply_yaml(&raw)?;
        }
        cfg.apply_keyring(HttpTransport::resolve_api_key);
        cfg.apply_env(|name| env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Build from an arbitrary variable source (no file, no keyring).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_yaml(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_yaml(&mut self, yaml: &str) -> Result<()> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;

        apply_provider_overrides(&mut self.openai, file.openai);
        apply_provider_overrides(&mut self.gemini, file.gemini);

        let cb = file.circuit_breaker;
        if let Some(v) = cb.failure_threshold {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = cb.reset_timeout_ms {
            self.circuit_breaker.reset_timeout = Duration::from_millis(v);
        }
        if let Some(v) = cb.half_open_requests {
            self.circuit_breaker.half_open_max_probes = v;
        }
        if let Some(v) = cb.monitoring_window_ms {
            self.circuit_breaker.failure_window = Duration::from_millis(v);
        }

        if let Some(v) = file.moderation.enabled {
            self.moderation.enabled = v;
        }
        if let Some(v) = file.moderation.timeout_ms {
            self.moderation.timeout_ms = v;
        }

        if let Some(v) = file.story.min_words {
            self.retry.min_words = v;
        }
        if let Some(v) = file.story.max_attempts {
            self.retry.max_attempts = v;
        }
        if let Some(v) = file.story.backoff_base_ms {
            self.retry.backoff_base = Duration::from_millis(v);
        }
        Ok(())
    }

    /// Fills keys the file left unset.
    fn apply_keyring(&mut self, resolve: impl Fn(&str) -> Option<String>) {
        for settings in [&mut self.openai, &mut self.gemini] {
            if settings.api_key.is_none() {
                settings.api_key = resolve(&settings.name);
            }
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        apply_provider_env(&mut self.openai, &lookup)?;
        apply_provider_env(&mut self.gemini, &lookup)?;
        if let Some(v) = parse_flag(&lookup, "GEMINI_ENABLED")? {
            self.gemini.enabled = v;
        }

        if let Some(v) = parse_var(&lookup, "AI_CIRCUIT_FAILURE_THRESHOLD")? {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_CIRCUIT_RESET_TIMEOUT_MS")? {
            self.circuit_breaker.reset_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "AI_CIRCUIT_HALF_OPEN_REQUESTS")? {
            self.circuit_breaker.half_open_max_probes = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_CIRCUIT_MONITORING_WINDOW_MS")? {
            self.circuit_breaker.failure_window = Duration::from_millis(v);
        }

        if let Some(v) = parse_flag(&lookup, "AI_MODERATION_ENABLED")? {
            self.moderation.enabled = v;
        }

        if let Some(v) = parse_var(&lookup, "AI_STORY_MIN_WORDS")? {
            self.retry.min_words = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_STORY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "AI_STORY_BACKOFF_BASE_MS")? {
            self.retry.backoff_base = Duration::from_millis(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, details: String| -> Result<()> {
            Err(Error::configuration_with_context(
                "invalid runtime configuration",
                ErrorContext::new()
                    .with_field_path(field)
                    .with_details(details)
                    .with_source("runtime_config"),
            ))
        };

        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold", "must be at least 1".into());
        }
        if self.circuit_breaker.half_open_max_probes == 0 {
            return invalid("circuit_breaker.half_open_requests", "must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("story.max_attempts", "must be at least 1".into());
        }
        for p in [&self.openai, &self.gemini] {
            if p.timeout_ms == 0 {
                return invalid(&format!("{}.timeout_ms", p.name), "must be positive".into());
            }
            if p.model.trim().is_empty() {
                return invalid(&format!("{}.model", p.name), "must not be empty".into());
            }
        }
        if self.openai.name == self.gemini.name {
            return invalid("providers", format!("duplicate provider name '{}'", self.openai.name));
        }
        Ok(())
    }

    pub fn providers(&self) -> [&ProviderSettings; 2] {
        [&self.openai, &self.gemini]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.openai.model, "gpt-4o-mini");
        assert_eq!(cfg.openai.timeout_ms, 60_000);
        assert_eq!(cfg.gemini.model, "gemini-2.0-flash");
        assert_eq!(cfg.gemini.timeout_ms, 45_000);
        assert!(!cfg.openai.is_active());
        assert!(!cfg.gemini.is_active());
        assert_eq!(cfg.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(cfg.retry.min_words, 1000);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.moderation.enabled);
    }

    #[test]
    fn test_enablement_rules() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "g-test"),
        ]))
        .unwrap();
        assert!(cfg.openai.is_active());
        // A gemini key alone is not enough.
        assert!(!cfg.gemini.is_active());

        let cfg = RuntimeConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "g-test"),
            ("GEMINI_ENABLED", "true"),
        ]))
        .unwrap();
        assert!(cfg.gemini.is_active());
    }

    #[test]
    fn test_circuit_env() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            ("AI_CIRCUIT_FAILURE_THRESHOLD", "3"),
            ("AI_CIRCUIT_RESET_TIMEOUT_MS", "5000"),
            ("AI_CIRCUIT_HALF_OPEN_REQUESTS", "2"),
            ("AI_CIRCUIT_MONITORING_WINDOW_MS", "10000"),
        ]))
        .unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 3);
        assert_eq!(cfg.circuit_breaker.reset_timeout, Duration::from_secs(5));
        assert_eq!(cfg.circuit_breaker.half_open_max_probes, 2);
        assert_eq!(cfg.circuit_breaker.failure_window, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_number_reports_variable() {
        let err = RuntimeConfig::from_lookup(lookup(&[("OPENAI_TIMEOUT_MS", "soon")])).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("OPENAI_TIMEOUT_MS"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err =
            RuntimeConfig::from_lookup(lookup(&[("AI_CIRCUIT_FAILURE_THRESHOLD", "0")])).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_yaml_overlay() {
        let cfg = RuntimeConfig::from_yaml_str(
            r#"
openai:
  model: gpt-4o
gemini:
  enabled: true
  api_key: g-file
  timeout_ms: 30000
circuit_breaker:
  failure_threshold: 2
story:
  min_words: 800
  backoff_base_ms: 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.openai.model, "gpt-4o");
        assert_eq!(cfg.openai.timeout_ms, 60_000);
        assert!(cfg.gemini.is_active());
        assert_eq!(cfg.gemini.model, "gemini-2.0-flash");
        assert_eq!(cfg.gemini.timeout_ms, 30_000);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 2);
        assert_eq!(cfg.retry.min_words, 800);
        assert_eq!(cfg.retry.backoff_base, Duration::from_millis(10));
    }

    #[test]
    fn test_env_key_overrides_keyring_and_file() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_yaml("openai:\n  api_key: sk-file\n").unwrap();
        cfg.apply_keyring(|name| Some(format!("{}-keyring", name)));
        assert_eq!(cfg.openai.api_key.as_deref(), Some("sk-file"));
        assert_eq!(cfg.gemini.api_key.as_deref(), Some("gemini-keyring"));

        cfg.apply_env(lookup(&[("OPENAI_API_KEY", "sk-env"), ("GEMINI_API_KEY", "g-env")]))
            .unwrap();
        assert_eq!(cfg.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.gemini.api_key.as_deref(), Some("g-env"));
    }

    #[test]
    fn test_blank_env_key_keeps_keyring_key() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_keyring(|_| Some("sk-keyring".to_string()));
        cfg.apply_env(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert_eq!(cfg.openai.api_key.as_deref(), Some("sk-keyring"));
    }

    #[test]
    fn test_yaml_unknown_field() {
        assert!(matches!(
            RuntimeConfig::from_yaml_str("openai:\n  modle: x\n"),
            Err(Error::Yaml(_))
        ));
    }
}
