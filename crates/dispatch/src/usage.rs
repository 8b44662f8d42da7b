//! Append-only usage accounting shared by every call of an operation.

use crate::backend::CallUsage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct UsageCounter {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_nanodollars: AtomicU64,
    latency_ms: AtomicU64,
}

impl UsageCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, usage: &CallUsage, latency: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.cost_nanodollars
            .fetch_add(usage.cost_nanodollars, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_failed(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.fetch_add(ms, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> Usage {
        let input = self.input_tokens.load(Ordering::Relaxed);
        let output = self.output_tokens.load(Ordering::Relaxed);
        Usage {
            requests: RequestUsage {
                started: self.started.load(Ordering::Relaxed),
                completed: self.completed.load(Ordering::Relaxed),
                failed: self.failed.load(Ordering::Relaxed),
                cancelled: self.cancelled.load(Ordering::Relaxed),
            },
            tokens: TokenUsage {
                input,
                output,
                total: input + output,
            },
            cost_nanodollars: self.cost_nanodollars.load(Ordering::Relaxed),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUsage {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Point-in-time copy of a [`UsageCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub requests: RequestUsage,
    pub tokens: TokenUsage,
    pub cost_nanodollars: u64,
    /// Sum of per-call latencies, so it exceeds wall time under concurrency
    pub latency_ms: u64,
}

impl Usage {
    #[must_use]
    pub fn cost_usd(&self) -> f64 {
        self.cost_nanodollars as f64 / 1_000_000_000.0
    }

    /// Usage accrued between `earlier` and `self`
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            requests: RequestUsage {
                started: self.requests.started.saturating_sub(earlier.requests.started),
                completed: self
                    .requests
                    .completed
                    .saturating_sub(earlier.requests.completed),
                failed: self.requests.failed.saturating_sub(earlier.requests.failed),
                cancelled: self
                    .requests
                    .cancelled
                    .saturating_sub(earlier.requests.cancelled),
            },
            tokens: TokenUsage {
                input: self.tokens.input.saturating_sub(earlier.tokens.input),
                output: self.tokens.output.saturating_sub(earlier.tokens.output),
                total: self.tokens.total.saturating_sub(earlier.tokens.total),
            },
            cost_nanodollars: self
                .cost_nanodollars
                .saturating_sub(earlier.cost_nanodollars),
            latency_ms: self.latency_ms.saturating_sub(earlier.latency_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counter_accumulates() {
        let counter = UsageCounter::new();
        let call = CallUsage {
            input_tokens: 100,
            output_tokens: 20,
            cost_nanodollars: 1_500_000,
        };
        counter.record_started();
        counter.record_completed(&call, Duration::from_millis(40));
        counter.record_started();
        counter.record_failed(Duration::from_millis(10));

        let usage = counter.snapshot();
        assert_eq!(usage.requests.started, 2);
        assert_eq!(usage.requests.completed, 1);
        assert_eq!(usage.requests.failed, 1);
        assert_eq!(usage.tokens.total, 120);
        assert_eq!(usage.latency_ms, 50);
        assert!((usage.cost_usd() - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn test_since_subtracts_baseline() {
        let counter = UsageCounter::new();
        counter.record_started();
        let before = counter.snapshot();
        counter.record_started();
        counter.record_cancelled();
        let delta = counter.snapshot().since(&before);
        assert_eq!(delta.requests.started, 1);
        assert_eq!(delta.requests.cancelled, 1);
    }
}
