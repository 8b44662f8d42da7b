use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry limits for one chunk.
///
/// `max_retries` counts corrective follow-ups after a malformed reply;
/// `transport_retries` counts plain re-sends after a transport error. The
/// two budgets are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub transport_retries: usize,
    pub transport_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            transport_retries: 2,
            transport_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// No retries of either kind
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            transport_retries: 0,
            transport_delay_ms: 0,
        }
    }

    #[must_use]
    pub const fn transport_delay(&self) -> Duration {
        Duration::from_millis(self.transport_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err("max_retries must be at most 10".to_string());
        }
        if self.transport_retries > 10 {
            return Err("transport_retries must be at most 10".to_string());
        }
        if self.transport_delay_ms > 60_000 {
            return Err("transport_delay_ms must be at most 60000".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum backend calls in flight
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.concurrency > 256 {
            return Err("concurrency must be at most 256".to_string());
        }
        self.retry.validate()
    }
}
