//! # Resilience
//!
//! Per-provider circuit breakers.
//!
//! - **Closed**: requests pass; consecutive failures are counted
//! - **Open**: requests are rejected until the reset timeout elapses
//! - **Half-Open**: a limited number of probes decide between Closed and Open
//!
//! ```rust
//! use ai_story_runtime::resilience::circuit_breaker::{
//!     CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
//! };
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(2)
//!     .with_reset_timeout(Duration::from_secs(30));
//! let breakers = CircuitBreakerRegistry::new(config);
//!
//! assert!(breakers.can_request("openai"));
//! breakers.record_failure("openai", None);
//! breakers.record_failure("openai", None);
//! assert_eq!(breakers.get_state("openai"), CircuitState::Open);
//! assert!(!breakers.can_request("openai"));
//! ```

pub mod circuit_breaker;
