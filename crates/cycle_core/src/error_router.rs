//! Side channel for stream errors.
//!
//! A rerouted stream never surfaces its error to its own consumer: the error
//! is published on the router's multicast [`ErrorRouter::error`] stream and
//! the rerouted stream completes (or, with [`ErrorRouter::reroute_or`],
//! yields a fallback element first).

use std::{
    fmt,
    marker::PhantomData,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use futures::{
    channel::mpsc::{self, UnboundedSender},
    stream::BoxStream,
    Stream, StreamExt,
};
use tracing::{trace, warn};

type Observers<E> = Vec<UnboundedSender<Arc<E>>>;

/// Every observer owns an unbounded queue, so a slow observer never loses
/// errors. Observers that went away are pruned on the next route.
pub struct ErrorRouter<E> {
    observers: Arc<Mutex<Observers<E>>>,
}

impl<E> Clone for ErrorRouter<E> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
        }
    }
}

impl<E> Default for ErrorRouter<E>
where
    E: fmt::Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ErrorRouter<E>
where
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Observers<E>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every error routed after the call. Ends once the router and all
    /// rerouted streams are gone.
    pub fn error(&self) -> BoxStream<'static, Arc<E>> {
        let (sender, receiver) = mpsc::unbounded();
        self.observers().push(sender);
        receiver.boxed()
    }

    pub fn route_error(&self, error: E) {
        warn!(%error, "error router: error routed");
        let error = Arc::new(error);
        // Sending under the lock keeps one order across all observers.
        let mut observers = self.observers();
        observers.retain(|observer| observer.unbounded_send(error.clone()).is_ok());
        trace!(observers = observers.len(), "error router: error delivered");
    }

    /// Turns the first error of `source` into completion. The output error
    /// type is free because no error is ever yielded.
    pub fn reroute_error<St, T, Out>(&self, source: St) -> Rerouted<St, E, fn(&E) -> T, Out>
    where
        St: Stream<Item = Result<T, E>> + Unpin,
    {
        Rerouted {
            source,
            router: self.clone(),
            fallback: None,
            finished: false,
            _out: PhantomData,
        }
    }

    /// Like [`ErrorRouter::reroute_error`], but yields `fallback(&error)`
    /// before completing.
    pub fn reroute_or<St, T, F, Out>(&self, source: St, fallback: F) -> Rerouted<St, E, F, Out>
    where
        St: Stream<Item = Result<T, E>> + Unpin,
        F: FnOnce(&E) -> T,
    {
        Rerouted {
            source,
            router: self.clone(),
            fallback: Some(fallback),
            finished: false,
            _out: PhantomData,
        }
    }
}

pub struct Rerouted<St, E, F, Out> {
    source: St,
    router: ErrorRouter<E>,
    fallback: Option<F>,
    finished: bool,
    _out: PhantomData<fn() -> Out>,
}

impl<St: Unpin, E, F, Out> Unpin for Rerouted<St, E, F, Out> {}

impl<St, T, E, F, Out> Stream for Rerouted<St, E, F, Out>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    E: fmt::Display + Send + Sync + 'static,
    F: FnOnce(&E) -> T,
{
    type Item = Result<T, Out>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match futures::ready!(this.source.poll_next_unpin(cx)) {
            Some(Ok(value)) => Poll::Ready(Some(Ok(value))),
            Some(Err(err)) => {
                this.finished = true;
                let replacement = this.fallback.take().map(|fallback| fallback(&err));
                this.router.route_error(err);
                Poll::Ready(replacement.map(Ok))
            }
            None => {
                this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/error_router_tests.rs"]
mod tests;
