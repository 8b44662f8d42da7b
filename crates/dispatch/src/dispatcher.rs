use crate::attempt::Attempt;
use crate::backend::{Backend, GenerateRequest, Generation};
use crate::config::DispatchConfig;
use crate::error::{BackendError, ChunkFailure, DispatchError, Result};
use crate::usage::UsageCounter;
use context_protocol::{excerpt, ErrorKind, ProtocolError, EXCERPT_CHARS};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// One kind of per-chunk work: how to prompt for a chunk and how to read
/// the reply back.
pub trait ChunkTask: Send + Sync {
    type Chunk: Send + Sync;
    type Output: Send;

    fn request(&self, chunk: &Self::Chunk) -> GenerateRequest;

    /// Parse a reply; an error triggers a corrective follow-up turn
    fn parse(&self, chunk: &Self::Chunk, reply: &str)
        -> std::result::Result<Self::Output, ProtocolError>;
}

/// Per-chunk outcomes of one [`Dispatcher::run`], in chunk order
#[derive(Debug)]
pub struct DispatchReport<T> {
    pub results: Vec<std::result::Result<T, ChunkFailure>>,
}

impl<T> DispatchReport<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChunkFailure> {
        self.results.iter().filter_map(|result| result.as_ref().err())
    }

    /// Split into `(chunk index, output)` pairs and failures
    #[must_use]
    pub fn into_parts(self) -> (Vec<(usize, T)>, Vec<ChunkFailure>) {
        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for (index, result) in self.results.into_iter().enumerate() {
            match result {
                Ok(output) => outputs.push((index, output)),
                Err(failure) => failures.push(failure),
            }
        }
        (outputs, failures)
    }
}

/// Runs one backend conversation per chunk under a concurrency cap.
///
/// All calls share the dispatcher's usage counter and cancellation token,
/// so several `run` rounds of one operation form one lifecycle.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    config: DispatchConfig,
    usage: Arc<UsageCounter>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, config: DispatchConfig) -> Result<Self> {
        config.validate().map_err(DispatchError::InvalidConfig)?;
        Ok(Self {
            backend,
            config,
            usage: Arc::new(UsageCounter::new()),
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Arc<UsageCounter>) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub const fn usage(&self) -> &Arc<UsageCounter> {
        &self.usage
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast at a phase boundary once the shared token is cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(DispatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Dispatch every chunk; results come back in chunk order.
    ///
    /// A chunk that keeps failing is reported in the [`DispatchReport`]
    /// without affecting the others. Cancellation aborts the whole run.
    pub async fn run<T: ChunkTask>(
        &self,
        task: &T,
        chunks: &[T::Chunk],
    ) -> Result<DispatchReport<T::Output>> {
        self.check_cancelled()?;
        log::debug!(
            "Dispatching {} chunk(s) with concurrency {}",
            chunks.len(),
            self.config.concurrency
        );

        let outcomes: Vec<Result<T::Output>> = stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| self.execute(task, index, chunk))
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(output) => results.push(Ok(output)),
                Err(DispatchError::Chunk(failure)) => {
                    log::warn!("{failure}");
                    results.push(Err(failure));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(DispatchReport { results })
    }

    /// Dispatch a single chunk, surfacing its failure as an error
    pub async fn call<T: ChunkTask>(&self, task: &T, chunk: &T::Chunk) -> Result<T::Output> {
        self.check_cancelled()?;
        self.execute(task, 0, chunk).await
    }

    async fn execute<T: ChunkTask>(
        &self,
        task: &T,
        index: usize,
        chunk: &T::Chunk,
    ) -> Result<T::Output> {
        self.check_cancelled()?;
        let template = task.request(chunk);
        let mut attempt = Attempt::start(template.messages.clone());

        loop {
            let request = match attempt {
                Attempt::Pending { ref history, .. } => GenerateRequest {
                    messages: history.clone(),
                    ..template.clone()
                },
                Attempt::Done(output) => {
                    log::debug!("Chunk {index} done");
                    return Ok(output);
                }
                Attempt::Fatal {
                    error,
                    reply,
                    attempts,
                } => {
                    return Err(DispatchError::Chunk(ChunkFailure {
                        chunk: index,
                        kind: error.kind(),
                        message: format!("{error} (after {attempts} attempt(s))"),
                        excerpt: Some(excerpt(&reply, EXCERPT_CHARS)),
                    }));
                }
            };
            let generation = self.generate(&request).await.map_err(|err| match err {
                DispatchError::Chunk(failure) => DispatchError::Chunk(ChunkFailure {
                    chunk: index,
                    ..failure
                }),
                other => other,
            })?;
            let parsed = task.parse(chunk, &generation.text);
            attempt = attempt.advance(generation.text, parsed, self.config.retry.max_retries);
        }
    }

    /// One backend call with transport-level retry, raced against the token
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let policy = self.config.retry;
        let mut transport_attempt = 0;

        loop {
            self.check_cancelled()?;
            self.usage.record_started();
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(BackendError::Cancelled),
                result = self.backend.generate(request, &self.cancel) => result,
            };

            match result {
                Ok(generation) => {
                    self.usage
                        .record_completed(&generation.usage, started.elapsed());
                    return Ok(generation);
                }
                Err(BackendError::Cancelled) => {
                    self.usage.record_cancelled();
                    return Err(DispatchError::Cancelled);
                }
                Err(BackendError::Transport(msg)) if transport_attempt < policy.transport_retries => {
                    self.usage.record_failed(started.elapsed());
                    transport_attempt += 1;
                    log::warn!(
                        "Transport error ({msg}), re-sending in {}ms ({transport_attempt}/{})",
                        policy.transport_delay_ms,
                        policy.transport_retries
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
                        () = tokio::time::sleep(policy.transport_delay()) => {}
                    }
                }
                Err(err) => {
                    self.usage.record_failed(started.elapsed());
                    return Err(DispatchError::Chunk(ChunkFailure {
                        chunk: 0,
                        kind: ErrorKind::Backend,
                        message: err.to_string(),
                        excerpt: None,
                    }));
                }
            }
        }
    }
}
