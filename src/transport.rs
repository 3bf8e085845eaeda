//! Transport boundary of a [ServiceProxy][crate::ServiceProxy].
//!
//! A transport is a [Stream] of inbound [Envelope]s and a [Sink] for outbound
//! ones. The proxy consumes the stream on a single task, which takes the role
//! of the one subscribed message handler.
use futures::prelude::*;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A transport unit together with transport supplied context.
///
/// Inbound envelopes always carry a context, for example the identity of the
/// peer. Outbound envelopes carry `Some(context)` when they answer an inbound
/// request and `None` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T, C> {
    pub message: T,
    pub context: C,
}

impl<T, C> Envelope<T, C> {
    pub fn new(message: T, context: C) -> Self {
        Self { message, context }
    }
}

pub mod memory {
    //! In-process transport connecting two proxies.
    use super::*;
    use futures::channel::mpsc;

    /// Create two connected transports.
    ///
    /// Every message received by the first transport carries `context_for_a`,
    /// every message received by the second one carries `context_for_b`. The
    /// context of outbound envelopes is ignored.
    pub fn pair<T, K: Clone>(
        context_for_a: K,
        context_for_b: K,
    ) -> (MemoryTransport<T, K>, MemoryTransport<T, K>) {
        let (to_a, a_inbound) = mpsc::unbounded();
        let (to_b, b_inbound) = mpsc::unbounded();
        let a = MemoryTransport {
            inbound: a_inbound,
            peer: to_b,
            peer_context: context_for_b,
        };
        let b = MemoryTransport {
            inbound: b_inbound,
            peer: to_a,
            peer_context: context_for_a,
        };
        (a, b)
    }

    /// One end of a [pair].
    ///
    /// Envelopes sent into it are delivered to the other end, stamped with the
    /// context of the other end.
    #[pin_project::pin_project]
    #[derive(Debug)]
    pub struct MemoryTransport<T, K> {
        #[pin]
        inbound: mpsc::UnboundedReceiver<Envelope<T, K>>,
        #[pin]
        peer: mpsc::UnboundedSender<Envelope<T, K>>,
        peer_context: K,
    }

    impl<T, K> Stream for MemoryTransport<T, K> {
        type Item = Envelope<T, K>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.project().inbound.poll_next(cx)
        }
    }

    impl<T, K: Clone> Sink<Envelope<T, Option<K>>> for MemoryTransport<T, K> {
        type Error = mpsc::SendError;

        fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.project().peer.poll_ready(cx)
        }

        fn start_send(
            self: Pin<&mut Self>,
            item: Envelope<T, Option<K>>,
        ) -> Result<(), Self::Error> {
            let this = self.project();
            let envelope = Envelope::new(item.message, this.peer_context.clone());
            this.peer.start_send(envelope)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.project().peer.poll_flush(cx)
        }

        fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.project().peer.poll_close(cx)
        }
    }
}
