//! Request and completion futures.
//!
//! An engine answers every request with exactly one success or error event.
//! [`request`] pairs the engine-side [`Responder`] with the caller-side
//! [`Request`] future, so both outcomes are wired before the request is
//! handed back to the caller and neither can be missed.
//!
//! A transaction's terminal event travels the same way through
//! [`completion`]: the engine holds the [`CompletionSignal`], any number of
//! observers hold a [`Completion`].

use crate::error::{EngineError, EngineResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};

/// Creates a connected responder/request pair.
#[must_use]
pub fn request<T>() -> (Responder<T>, Request<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Responder { tx },
        Request {
            state: RequestState::Waiting(rx),
        },
    )
}

/// Engine side of a pending request.
#[derive(Debug)]
pub struct Responder<T> {
    tx: oneshot::Sender<EngineResult<T>>,
}

impl<T> Responder<T> {
    /// Delivers the success event.
    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    /// Delivers the error event.
    pub fn fail(self, error: EngineError) {
        self.resolve(Err(error));
    }

    /// Delivers either event.
    pub fn resolve(self, result: EngineResult<T>) {
        // The caller may have dropped the request; the engine still ran it.
        let _ = self.tx.send(result);
    }
}

/// Caller side of a pending request.
///
/// Resolves to the request's result, or to [`EngineError::Aborted`] if the
/// engine dropped the responder without answering.
#[derive(Debug)]
pub struct Request<T> {
    state: RequestState<T>,
}

#[derive(Debug)]
enum RequestState<T> {
    /// Answered at issue time. Polling never yields, so it cannot end a turn
    /// on its own (runtime budgeting included).
    Ready(Option<EngineResult<T>>),
    Waiting(oneshot::Receiver<EngineResult<T>>),
}

impl<T> Request<T> {
    /// Creates a request that has already been answered.
    #[must_use]
    pub fn ready(result: EngineResult<T>) -> Self {
        Self {
            state: RequestState::Ready(Some(result)),
        }
    }
}

impl<T> Unpin for Request<T> {}

impl<T> Future for Request<T> {
    type Output = EngineResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            RequestState::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(|| {
                Err(EngineError::invalid_state("request polled after completion"))
            })),
            RequestState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(EngineError::aborted(
                    "request was dropped before it completed",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Creates a connected signal/completion pair for one transaction.
#[must_use]
pub fn completion() -> (CompletionSignal, Completion) {
    let (tx, rx) = watch::channel(None);
    (CompletionSignal { tx }, Completion { rx })
}

/// Engine side of a transaction's terminal event.
///
/// Only the first terminal event is recorded.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<Option<EngineResult<()>>>,
}

impl CompletionSignal {
    /// Records that the transaction committed.
    pub fn complete(&self) {
        self.finish(Ok(()));
    }

    /// Records that the transaction aborted with the given error.
    pub fn fail(&self, error: EngineError) {
        self.finish(Err(error));
    }

    /// Returns true once a terminal event has been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn finish(&self, outcome: EngineResult<()>) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

/// Observer side of a transaction's terminal event.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<EngineResult<()>>>,
}

impl Completion {
    /// Returns the terminal outcome if it has been reached.
    #[must_use]
    pub fn outcome(&self) -> Option<EngineResult<()>> {
        self.rx.borrow().clone()
    }

    /// Waits for the terminal event.
    ///
    /// Resolves to `Ok(())` on commit and to the abort error otherwise. If
    /// the engine drops the signal without a terminal event, the transaction
    /// is reported as aborted.
    pub async fn wait(mut self) -> EngineResult<()> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(EngineError::aborted("transaction finished without outcome"))),
            Err(_) => Err(EngineError::aborted(
                "transaction was dropped before it finished",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_resolves_with_response() {
        let (responder, pending) = request::<u32>();
        responder.succeed(7);
        assert_eq!(pending.await, Ok(7));
    }

    #[tokio::test]
    async fn ready_request_resolves_immediately() {
        let pending = Request::ready(Err::<u32, _>(EngineError::data("bad key")));
        assert!(matches!(pending.await, Err(EngineError::Data { .. })));
    }

    #[tokio::test]
    async fn dropped_responder_reports_abort() {
        let (responder, pending) = request::<u32>();
        drop(responder);
        assert!(matches!(pending.await, Err(EngineError::Aborted { .. })));
    }

    #[tokio::test]
    async fn completion_keeps_first_outcome() {
        let (signal, done) = completion();
        assert!(done.outcome().is_none());

        signal.fail(EngineError::quota_exceeded("full"));
        signal.complete();

        assert!(signal.is_finished());
        assert!(matches!(
            done.clone().wait().await,
            Err(EngineError::QuotaExceeded { .. })
        ));
        assert!(matches!(done.outcome(), Some(Err(_))));
    }

    #[tokio::test]
    async fn completion_waits_for_signal() {
        let (signal, done) = completion();
        let waiter = done.wait();
        signal.complete();
        assert_eq!(waiter.await, Ok(()));
    }
}
