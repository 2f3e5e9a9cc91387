//! Fallback telemetry.
//!
//! Every provider failure handled by the orchestrator is recorded as a
//! [`FallbackEvent`] in a bounded, in-memory [`FallbackEventLog`]. Nothing is
//! exported; the log backs the observability surface (recent events) and is
//! meant to be cheap enough to keep always on.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`FallbackEvent`] | one `from → to` hand-off with reason and error code |
//! | [`FallbackEventLog`] | ring of the last N events, atomic push-and-trim |

use crate::error_code::ProviderErrorCode;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Events retained by default.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// `to_provider` value when no provider is left to fall back to.
pub const NO_PROVIDER: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackEvent {
    pub from_provider: String,
    pub to_provider: String,
    pub reason: String,
    pub error_code: ProviderErrorCode,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl FallbackEvent {
    pub fn new(
        from_provider: impl Into<String>,
        to_provider: impl Into<String>,
        reason: impl Into<String>,
        error_code: ProviderErrorCode,
    ) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            from_provider: from_provider.into(),
            to_provider: to_provider.into(),
            reason: reason.into(),
            error_code,
            timestamp_ms,
        }
    }
}

/// Bounded in-memory log.
pub struct FallbackEventLog {
    events: Mutex<VecDeque<FallbackEvent>>,
    max_events: usize,
}

impl FallbackEventLog {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(max)),
            max_events: max,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FallbackEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: FallbackEvent) {
        let mut events = self.lock();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<FallbackEvent> {
        let events = self.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for FallbackEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn event(i: usize) -> FallbackEvent {
        FallbackEvent::new(
            "openai",
            "gemini",
            format!("failure {}", i),
            ProviderErrorCode::ServerError,
        )
    }

    #[test]
    fn test_trims_to_capacity() {
        let log = FallbackEventLog::default();
        for i in 0..150 {
            log.push(event(i));
        }
        assert_eq!(log.len(), 100);
        let all = log.recent(1000);
        assert_eq!(all.first().unwrap().reason, "failure 50");
        assert_eq!(all.last().unwrap().reason, "failure 149");
    }

    #[test]
    fn test_recent_is_newest_tail() {
        let log = FallbackEventLog::new(10);
        for i in 0..5 {
            log.push(event(i));
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].reason, "failure 3");
        assert_eq!(recent[1].reason, "failure 4");
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_concurrent_push_never_exceeds_capacity() {
        let log = Arc::new(FallbackEventLog::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..100 {
                        log.push(event(t * 1000 + i));
                        assert!(log.len() <= 50);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 50);
    }

    #[test]
    fn test_serializes_code_name() {
        let json = serde_json::to_value(event(1)).unwrap();
        assert_eq!(json["error_code"], "SERVER_ERROR");
        assert_eq!(json["to_provider"], "gemini");
    }
}
