//! Per-provider circuit breaker registry.
//!
//! Each provider name owns one [`CircuitRecord`], created lazily on first
//! reference and kept for the lifetime of the registry. Every read-modify-write
//! sequence for a provider runs under that provider's own mutex, so concurrent
//! generation requests observe a consistent state per provider while requests
//! for different providers never contend.
//!
//! ```text
//!            failures >= threshold             reset timeout elapsed
//!  CLOSED ─────────────────────────▶ OPEN ─────────────────────────▶ HALF_OPEN
//!    ▲                                 ▲                                 │
//!    │           probe succeeded       │        probe failed             │
//!    └─────────────────────────────────┼─────────────────────────────────┤
//!                                      └─────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, every request passes
    Closed,
    /// Failing fast until the reset timeout elapses
    Open,
    /// Letting a bounded number of probe requests through
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive in-window failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects requests before probing.
    pub reset_timeout: Duration,
    /// Probe requests allowed per half-open episode.
    pub half_open_max_probes: u32,
    /// Failures further apart than this do not compound.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 1,
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold (at least 1)
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the open → half-open timeout
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the number of half-open probes (at least 1)
    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes.max(1);
        self
    }

    /// Set the window within which failures count as consecutive
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }
}

/// Outcome of [`CircuitBreakerRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    /// Circuit closed.
    Allowed,
    /// One of the limited half-open probes.
    Probe,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Mutable bookkeeping for one provider.
///
/// `opened_at` is `Some` exactly while `state == Open`.
#[derive(Debug, Clone)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
    pub opened_at: Option<Instant>,
    pub half_open_probes_issued: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            last_success_time: None,
            opened_at: None,
            half_open_probes_issued: 0,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// Point-in-time view of one provider's circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub provider_name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of circuit breakers keyed by provider name.
pub struct CircuitBreakerRegistry {
    cfg: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Arc<Mutex<CircuitRecord>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        info!(
            failure_threshold = cfg.failure_threshold,
            reset_timeout_ms = cfg.reset_timeout.as_millis() as u64,
            half_open_max_probes = cfg.half_open_max_probes,
            failure_window_ms = cfg.failure_window.as_millis() as u64,
            "circuit breaker registry initialized"
        );
        Self {
            cfg,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn circuit(&self, name: &str) -> Arc<Mutex<CircuitRecord>> {
        let mut circuits = lock(&self.circuits);
        circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::new())))
            .clone()
    }

    fn reset_elapsed(&self, record: &CircuitRecord, now: Instant) -> bool {
        match record.opened_at {
            Some(opened_at) => now.saturating_duration_since(opened_at) >= self.cfg.reset_timeout,
            None => false,
        }
    }

    fn transition(
        &self,
        name: &str,
        record: &mut CircuitRecord,
        new_state: CircuitState,
        reason: &str,
        now: Instant,
    ) {
        let previous_state = record.state;
        record.state = new_state;
        record.half_open_probes_issued = 0;
        match new_state {
            CircuitState::Open => record.opened_at = Some(now),
            CircuitState::HalfOpen => record.opened_at = None,
            CircuitState::Closed => {
                record.opened_at = None;
                record.consecutive_failures = 0;
            }
        }
        warn!(
            provider = name,
            previous_state = %previous_state,
            new_state = %new_state,
            reason,
            "circuit state change"
        );
    }

    /// Gate a request to `name`, reporting whether the grant is a half-open probe.
    ///
    /// On an open circuit whose reset timeout has elapsed this call performs the
    /// OPEN → HALF_OPEN transition and is itself the first probe of the episode.
    pub fn admit(&self, name: &str) -> Admission {
        let circuit = self.circuit(name);
        let mut record = lock(&circuit);
        let now = Instant::now();

        match record.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if !self.reset_elapsed(&record, now) {
                    return Admission::Rejected;
                }
                self.transition(name, &mut record, CircuitState::HalfOpen, "reset timeout elapsed", now);
                record.half_open_probes_issued = 1;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if record.half_open_probes_issued >= self.cfg.half_open_max_probes {
                    return Admission::Rejected;
                }
                record.half_open_probes_issued += 1;
                Admission::Probe
            }
        }
    }

    pub fn can_request(&self, name: &str) -> bool {
        self.admit(name).is_allowed()
    }

    /// Read-only counterpart of [`can_request`](Self::can_request): would a request be let through right now?
    pub fn is_available(&self, name: &str) -> bool {
        let circuit = self.circuit(name);
        let record = lock(&circuit);
        match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(&record, Instant::now()),
            CircuitState::HalfOpen => record.half_open_probes_issued < self.cfg.half_open_max_probes,
        }
    }

    pub fn record_success(&self, name: &str) {
        let circuit = self.circuit(name);
        let mut record = lock(&circuit);
        let now = Instant::now();

        record.total_requests += 1;
        record.total_successes += 1;
        record.last_success_time = Some(now);
        record.consecutive_failures = 0;

        if record.state == CircuitState::HalfOpen {
            self.transition(name, &mut record, CircuitState::Closed, "probe request succeeded", now);
        }

        debug!(provider = name, state = %record.state, "circuit success");
    }

    pub fn record_failure(&self, name: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        let circuit = self.circuit(name);
        let mut record = lock(&circuit);
        let now = Instant::now();

        record.total_requests += 1;
        record.total_failures += 1;

        // An isolated failure long after the previous one starts a fresh streak.
        if let Some(last) = record.last_failure_time {
            if now.saturating_duration_since(last) > self.cfg.failure_window {
                record.consecutive_failures = 0;
            }
        }
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure_time = Some(now);

        warn!(
            provider = name,
            failure_count = record.consecutive_failures,
            threshold = self.cfg.failure_threshold,
            error = cause.map(|e| e.to_string()).unwrap_or_default(),
            "circuit failure"
        );

        match record.state {
            CircuitState::HalfOpen => {
                self.transition(name, &mut record, CircuitState::Open, "probe request failed", now);
            }
            CircuitState::Closed if record.consecutive_failures >= self.cfg.failure_threshold => {
                let reason = format!(
                    "failure threshold reached ({}/{})",
                    record.consecutive_failures, self.cfg.failure_threshold
                );
                self.transition(name, &mut record, CircuitState::Open, &reason, now);
            }
            _ => {}
        }
    }

    /// Hand back a half-open probe whose request ended neither in success nor failure
    /// (caller cancellation, empty stream), so the episode can still be resolved.
    pub fn release_probe(&self, name: &str) {
        let circuit = self.circuit(name);
        let mut record = lock(&circuit);
        if record.state == CircuitState::HalfOpen && record.half_open_probes_issued > 0 {
            record.half_open_probes_issued -= 1;
            debug!(provider = name, "half-open probe released");
        }
    }

    /// Force a circuit back to CLOSED (administrative override).
    pub fn reset(&self, name: &str) {
        let circuit = self.circuit(name);
        let mut record = lock(&circuit);
        let previous_state = record.state;

        record.state = CircuitState::Closed;
        record.consecutive_failures = 0;
        record.half_open_probes_issued = 0;
        record.opened_at = None;

        info!(provider = name, previous_state = %previous_state, "circuit reset");
    }

    pub fn reset_all(&self) {
        let names: Vec<String> = lock(&self.circuits).keys().cloned().collect();
        for name in &names {
            self.reset(name);
        }
        info!(count = names.len(), "all circuits reset");
    }

    /// Stored state; does not perform the OPEN → HALF_OPEN transition.
    pub fn get_state(&self, name: &str) -> CircuitState {
        lock(&self.circuit(name)).state
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.get_state(name) == CircuitState::Open
    }

    pub fn is_closed(&self, name: &str) -> bool {
        self.get_state(name) == CircuitState::Closed
    }

    /// Copy of the full record, mainly for diagnostics and tests.
    pub fn record(&self, name: &str) -> CircuitRecord {
        lock(&self.circuit(name)).clone()
    }

    pub fn stats(&self, name: &str) -> CircuitStats {
        let record = self.record(name);
        let open_remaining_ms = record.opened_at.and_then(|opened_at| {
            let until = opened_at + self.cfg.reset_timeout;
            let now = Instant::now();
            (until > now).then(|| (until - now).as_millis() as u64)
        });
        CircuitStats {
            provider_name: name.to_string(),
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            total_requests: record.total_requests,
            total_failures: record.total_failures,
            total_successes: record.total_successes,
            open_remaining_ms,
        }
    }

    /// Stats for every provider seen so far, ordered by name.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let mut names: Vec<String> = lock(&self.circuits).keys().cloned().collect();
        names.sort();
        names.iter().map(|name| self.stats(name)).collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
