//! Correlation of outstanding requests with their eventual outcome.
//!
//! The registry knows nothing about transports or encodings. It hands out
//! request ids and settles the [PendingRequest] for an id exactly once.
use chashmap::CHashMap;
use futures::channel::oneshot;
use futures::prelude::*;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};

use crate::message::RequestId;

pub struct RequestRegistry<T, E> {
    next_request_id: AtomicI64,
    pending: CHashMap<RequestId, oneshot::Sender<Result<T, E>>>,
}

impl<T, E> std::fmt::Debug for RequestRegistry<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("next_request_id", &self.next_request_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<T, E> Default for RequestRegistry<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RequestRegistry<T, E> {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicI64::new(0),
            pending: CHashMap::new(),
        }
    }

    /// Allocate a fresh id and start tracking a call for it.
    pub fn register_request(&self) -> (RequestId, PendingRequest<T, E>) {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender);
        (id, PendingRequest { receiver })
    }

    /// Settle the call `id` successfully with `value`.
    pub fn resolve_request(&self, id: RequestId, value: T) -> Result<(), UnknownRequestId<T>> {
        match self.pending.remove(&id) {
            Some(sender) => {
                // The caller may have dropped the pending request. The outcome has
                // nowhere to go then, but the id is still completed.
                let _ = sender.send(Ok(value));
                Ok(())
            }
            None => Err(UnknownRequestId { id, payload: value }),
        }
    }

    /// Settle the call `id` with `error`.
    pub fn reject_request(&self, id: RequestId, error: E) -> Result<(), UnknownRequestId<E>> {
        match self.pending.remove(&id) {
            Some(sender) => {
                let _ = sender.send(Err(error));
                Ok(())
            }
            None => Err(UnknownRequestId { id, payload: error }),
        }
    }

    /// Number of calls that have not been settled yet.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every outstanding call.
    ///
    /// The corresponding [PendingRequest]s settle with [RequestDropped].
    pub fn clear(&self) {
        let dropped = self.pending.clear();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropped pending requests");
        }
    }
}

/// Outcome of a registered call. Resolves once the registry settles it.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct PendingRequest<T, E> {
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Future for PendingRequest<T, E>
where
    E: From<RequestDropped>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match futures::ready!(self.receiver.poll_unpin(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(oneshot::Canceled) => Poll::Ready(Err(E::from(RequestDropped))),
        }
    }
}

/// The registry was cleared or dropped before the request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Request was dropped before it was settled")]
pub struct RequestDropped;

/// Returned when settling an id that is not pending.
///
/// Carries the undelivered payload back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRequestId<V> {
    pub id: RequestId,
    pub payload: V,
}

impl<V> std::fmt::Display for UnknownRequestId<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request with id {} does not exist", self.id)
    }
}

impl<V: std::fmt::Debug> std::error::Error for UnknownRequestId<V> {}
