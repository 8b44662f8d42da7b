use crate::error::{OperationError, Result};
use context_chunker::Tokenizer;
use context_dispatch::{
    Backend, CancellationToken, ChunkFailure, DispatchConfig, Dispatcher, Usage, UsageCounter,
};
use serde::{Deserialize, Serialize, Serializer};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tokens kept free in every prompt for wrapper text and message framing
pub const PROMPT_INPUT_BUFFER: usize = 1_048;

/// Tokens reserved for the reply when a budget is derived from the input window
pub const PROMPT_OUTPUT_BUFFER: usize = 512;

/// Context window of the model behind the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelLimits {
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            max_input_tokens: 128_000,
            max_output_tokens: 4_096,
        }
    }
}

impl ModelLimits {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_input_tokens <= PROMPT_INPUT_BUFFER + PROMPT_OUTPUT_BUFFER {
            return Err(format!(
                "max_input_tokens must be above {}",
                PROMPT_INPUT_BUFFER + PROMPT_OUTPUT_BUFFER
            ));
        }
        if self.max_output_tokens == 0 {
            return Err("max_output_tokens must be > 0".to_string());
        }
        Ok(())
    }
}

/// Result of one operation: the output plus what it cost
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub output: T,
    pub usage: Usage,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Chunks that never produced a valid reply and were left out
    pub gaps: Vec<ChunkFailure>,
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            output: f(self.output),
            usage: self.usage,
            elapsed: self.elapsed,
            gaps: self.gaps,
        }
    }
}

/// Shared state of every operation: backend, tokenizer, limits, usage and
/// the cancellation token.
///
/// Operations are `async` methods defined next to their algorithms
/// ([`Session::answer`], [`Session::group`], [`Session::patch`],
/// [`Session::label`]). Usage accumulates across calls; each [`Outcome`]
/// carries only its own share.
pub struct Session {
    backend: Arc<dyn Backend>,
    tokenizer: Arc<dyn Tokenizer>,
    limits: ModelLimits,
    dispatch: DispatchConfig,
    usage: Arc<UsageCounter>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            backend,
            tokenizer,
            limits: ModelLimits::default(),
            dispatch: DispatchConfig::default(),
            usage: Arc::new(UsageCounter::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_limits(mut self, limits: ModelLimits) -> Result<Self> {
        limits.validate().map_err(OperationError::invalid_input)?;
        self.limits = limits;
        Ok(self)
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Result<Self> {
        config.validate().map_err(OperationError::invalid_input)?;
        self.dispatch = config;
        Ok(self)
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn limits(&self) -> &ModelLimits {
        &self.limits
    }

    #[must_use]
    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Usage of every call made through this session so far
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.usage.snapshot()
    }

    pub(crate) fn dispatcher(&self) -> Result<Dispatcher> {
        Ok(Dispatcher::new(Arc::clone(&self.backend), self.dispatch)?
            .with_usage(Arc::clone(&self.usage))
            .with_cancellation(self.cancel.clone()))
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(context_dispatch::DispatchError::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Input tokens left after the prompt buffer
    pub(crate) fn input_window(&self) -> usize {
        self.limits
            .max_input_tokens
            .saturating_sub(PROMPT_INPUT_BUFFER)
    }

    pub(crate) fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Run an operation body and wrap its output with usage and timing
    pub(crate) async fn track<T, F>(&self, name: &str, body: F) -> Result<Outcome<T>>
    where
        F: Future<Output = Result<(T, Vec<ChunkFailure>)>>,
    {
        self.check_cancelled()?;
        let before = self.usage.snapshot();
        let started = Instant::now();
        log::info!("Starting {name}");

        let (output, gaps) = body.await?;
        let usage = self.usage.snapshot().since(&before);
        let elapsed = started.elapsed();
        if gaps.is_empty() {
            log::info!(
                "{name} finished in {}ms ({} request(s), {} tokens)",
                elapsed.as_millis(),
                usage.requests.started,
                usage.tokens.total
            );
        } else {
            log::warn!(
                "{name} finished in {}ms with {} chunk(s) left out",
                elapsed.as_millis(),
                gaps.len()
            );
        }
        Ok(Outcome {
            output,
            usage,
            elapsed,
            gaps,
        })
    }
}

/// `value` clamped into `[lower, upper]`; `upper` wins when the bounds cross
pub(crate) fn clamp(value: usize, lower: usize, upper: usize) -> usize {
    value.max(lower).min(upper)
}

/// `value * percent / 100`, rounded down
pub(crate) const fn percent(value: usize, percent: usize) -> usize {
    value / 100 * percent + value % 100 * percent / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_valid() {
        assert!(ModelLimits::default().validate().is_ok());
    }

    #[test]
    fn test_tiny_window_invalid() {
        let limits = ModelLimits {
            max_input_tokens: 1_000,
            ..ModelLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn clamp_prefers_upper_bound() {
        assert_eq!(clamp(50, 100, 400), 100);
        assert_eq!(clamp(500, 100, 400), 400);
        assert_eq!(clamp(50, 100, 20), 20);
    }

    #[test]
    fn percent_rounds_down() {
        assert_eq!(percent(16_000, 60), 9_600);
        assert_eq!(percent(999, 60), 599);
        assert_eq!(percent(usize::MAX, 100), usize::MAX);
    }
}
