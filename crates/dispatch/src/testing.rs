//! In-memory backend driven by a reply function, for tests.

use crate::backend::{Backend, CallUsage, GenerateRequest, Generation};
use crate::error::BackendError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Responder = dyn Fn(&GenerateRequest, usize) -> Result<String, BackendError> + Send + Sync;

/// One call counted in flight until dropped, even when the caller drops
/// the pending future.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    now: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, now }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend whose replies come from a closure of `(request, call number)`.
///
/// Records every request and the peak number of concurrent calls.
pub struct ScriptedBackend {
    responder: Box<Responder>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedBackend {
    pub fn new(
        responder: impl Fn(&GenerateRequest, usize) -> Result<String, BackendError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with the same text
    pub fn constant(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Reply with `replies` in call order, repeating the last one
    pub fn sequence<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        let replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        Self::new(move |_, call| {
            replies
                .get(call)
                .or_else(|| replies.last())
                .cloned()
                .ok_or_else(|| BackendError::Rejected("no scripted reply".to_string()))
        })
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight::enter(&self.in_flight);
        self.peak_in_flight.fetch_max(guard.now, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let result = if self.delay.is_zero() {
            (self.responder)(request, call)
        } else {
            tokio::select! {
                () = cancel.cancelled() => Err(BackendError::Cancelled),
                () = tokio::time::sleep(self.delay) => (self.responder)(request, call),
            }
        };
        drop(guard);

        let prompt: usize = request.messages.iter().map(|m| m.content.len()).sum();
        result.map(|text| Generation {
            usage: CallUsage {
                input_tokens: ((request.system.len() + prompt) / 4) as u64,
                output_tokens: (text.len() / 4) as u64,
                cost_nanodollars: 1_000,
            },
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn dropped_call_is_no_longer_in_flight() {
        let backend = ScriptedBackend::constant("ok").with_delay(Duration::from_secs(60));
        let request = GenerateRequest::new("system", "question");
        let cancel = CancellationToken::new();

        let pending = backend.generate(&request, &cancel);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(backend.calls(), 1);
        assert_eq!(backend.peak_in_flight(), 1);
        assert_eq!(backend.in_flight(), 0);
    }

    #[tokio::test]
    async fn finished_call_is_no_longer_in_flight() {
        let backend = ScriptedBackend::sequence(["first", "second"]);
        let request = GenerateRequest::new("system", "question");
        let cancel = CancellationToken::new();

        assert_eq!(backend.generate(&request, &cancel).await.unwrap().text, "first");
        assert_eq!(backend.generate(&request, &cancel).await.unwrap().text, "second");
        assert_eq!(backend.in_flight(), 0);
        assert_eq!(backend.peak_in_flight(), 1);
    }
}
