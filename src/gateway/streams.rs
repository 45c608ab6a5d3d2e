//! Usage: Stream adapters between transport channels and the session loops.

use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::errors::TransportError;

/// Exposes an mpsc receiver fed by a transport as a `Stream` of transport results.
pub struct MessageStream<T> {
    rx: mpsc::Receiver<Result<T, TransportError>>,
}

impl<T> MessageStream<T> {
    pub fn new(rx: mpsc::Receiver<Result<T, TransportError>>) -> Self {
        Self { rx }
    }

    /// Convenience for transports and tests: returns the feeding sender with the stream.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<T, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

impl<T> Stream for MessageStream<T> {
    type Item = Result<T, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

pub(in crate::gateway) struct NextItem<'a, S: ?Sized> {
    stream: &'a mut S,
}

impl<S> Future for NextItem<'_, S>
where
    S: Stream + Unpin + ?Sized,
{
    type Output = Option<S::Item>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut *self.stream).poll_next(cx)
    }
}

pub(in crate::gateway) fn next_item<S>(stream: &mut S) -> NextItem<'_, S>
where
    S: Stream + Unpin + ?Sized,
{
    NextItem { stream }
}
