//! Operators that group source elements into `Vec`s.
//!
//! Every operator here ends at the first source (or control) error and drops
//! whatever it had accumulated; buffered data is never emitted after an
//! error.

use std::{
    collections::VecDeque,
    mem,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{
    stream::{Fuse, Stream, StreamExt},
    ready,
};
use tokio::time::Instant;

use crate::{
    error::OperatorError,
    scheduler::{Periodic, Scheduler},
};

/// Sliding window of the newest `count` elements, emitted every `skip`
/// elements.
pub struct BufferCount<St, T> {
    source: Fuse<St>,
    count: usize,
    skip: usize,
    step: usize,
    window: VecDeque<T>,
    finished: bool,
}

impl<St: Unpin, T> Unpin for BufferCount<St, T> {}

impl<St, T, E> BufferCount<St, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
{
    pub fn new(source: St, count: usize, skip: usize) -> Result<Self, OperatorError> {
        if count == 0 {
            return Err(OperatorError::ZeroCount);
        }
        if skip == 0 {
            return Err(OperatorError::ZeroSkip);
        }
        Ok(Self {
            source: source.fuse(),
            count,
            skip,
            step: count,
            window: VecDeque::with_capacity(count + 1),
            finished: false,
        })
    }
}

impl<St, T, E> Stream for BufferCount<St, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    T: Clone,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.source.poll_next_unpin(cx)) {
                Some(Ok(value)) => {
                    this.window.push_back(value);
                    if this.window.len() > this.count {
                        this.window.pop_front();
                    }
                    this.step -= 1;
                    if this.step == 0 {
                        this.step = this.skip;
                        return Poll::Ready(Some(Ok(this.window.iter().cloned().collect())));
                    }
                }
                Some(Err(err)) => {
                    this.finished = true;
                    this.window.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    // The part of the next window that has already arrived.
                    let keep = this.count.saturating_sub(this.step).min(this.window.len());
                    let skip = this.window.len() - keep;
                    let tail: Vec<T> = this.window.drain(..).skip(skip).collect();
                    if tail.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(tail)));
                }
            }
        }
    }
}

/// Every `time_shift` (first after `time_span`), the elements that arrived
/// within the trailing `time_span`.
pub struct BufferTime<St, Sch: Scheduler, T> {
    source: Fuse<St>,
    scheduler: Sch,
    time_span: Duration,
    time_shift: Duration,
    ticks: Option<Periodic<Sch>>,
    arrivals: VecDeque<(Instant, T)>,
    last_emit: Option<Instant>,
    finished: bool,
}

impl<St: Unpin, Sch: Scheduler, T> Unpin for BufferTime<St, Sch, T> {}

impl<St, Sch, T, E> BufferTime<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
{
    pub fn new(
        source: St,
        time_span: Duration,
        time_shift: Duration,
        scheduler: Sch,
    ) -> Result<Self, OperatorError> {
        if time_span.is_zero() {
            return Err(OperatorError::ZeroTimeSpan);
        }
        if time_shift.is_zero() {
            return Err(OperatorError::ZeroTimeShift);
        }
        Ok(Self {
            source: source.fuse(),
            scheduler,
            time_span,
            time_shift,
            ticks: None,
            arrivals: VecDeque::new(),
            last_emit: None,
            finished: false,
        })
    }

    /// Window emitted on completion: everything since the last periodic
    /// emission, widened by `time_span - time_shift`.
    fn completion_window(&mut self, now: Instant) -> Vec<T> {
        let arrivals = mem::take(&mut self.arrivals);
        let Some(last_emit) = self.last_emit else {
            return arrivals.into_iter().map(|(_, value)| value).collect();
        };
        let widened = now.saturating_duration_since(last_emit) + self.time_span;
        let Some(span) = widened.checked_sub(self.time_shift) else {
            return Vec::new();
        };
        match now.checked_sub(span) {
            Some(cutoff) => arrivals
                .into_iter()
                .filter(|(at, _)| *at > cutoff)
                .map(|(_, value)| value)
                .collect(),
            None => arrivals.into_iter().map(|(_, value)| value).collect(),
        }
    }
}

impl<St, Sch, T, E> Stream for BufferTime<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
    T: Clone,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.ticks.is_none() {
            this.ticks = Some(
                this.scheduler
                    .schedule_periodic(this.time_span, this.time_shift),
            );
        }
        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.arrivals.push_back((this.scheduler.now(), value));
                    continue;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.arrivals.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    let now = this.scheduler.now();
                    return Poll::Ready(Some(Ok(this.completion_window(now))));
                }
                Poll::Pending => {}
            }

            let Some(ticks) = this.ticks.as_mut() else {
                return Poll::Pending;
            };
            let Some(now) = ready!(ticks.poll_next_unpin(cx)) else {
                return Poll::Pending;
            };
            if let Some(cutoff) = now.checked_sub(this.time_span) {
                while this.arrivals.front().is_some_and(|(at, _)| *at <= cutoff) {
                    this.arrivals.pop_front();
                }
            }
            this.last_emit = Some(now);
            let window = this.arrivals.iter().map(|(_, value)| value.clone()).collect();
            return Poll::Ready(Some(Ok(window)));
        }
    }
}

/// Accumulates until `boundary` signals, then emits and starts over.
pub struct BufferBoundary<St, B, T> {
    source: Fuse<St>,
    boundary: Fuse<B>,
    pending: Vec<T>,
    finished: bool,
}

impl<St: Unpin, B: Unpin, T> Unpin for BufferBoundary<St, B, T> {}

impl<St, B, T, U, E> BufferBoundary<St, B, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    B: Stream<Item = Result<U, E>> + Unpin,
{
    pub fn new(source: St, boundary: B) -> Self {
        Self {
            source: source.fuse(),
            boundary: boundary.fuse(),
            pending: Vec::new(),
            finished: false,
        }
    }
}

impl<St, B, T, U, E> Stream for BufferBoundary<St, B, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    B: Stream<Item = Result<U, E>> + Unpin,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.pending.push(value);
                    continue;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if this.pending.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(mem::take(&mut this.pending))));
                }
                Poll::Pending => {}
            }

            // A finished boundary only stops the flushes; the source keeps
            // accumulating until it completes.
            return match this.boundary.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(_))) => Poll::Ready(Some(Ok(mem::take(&mut this.pending)))),
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.pending.clear();
                    Poll::Ready(Some(Err(err)))
                }
                Poll::Ready(None) | Poll::Pending => Poll::Pending,
            };
        }
    }
}

/// Passes elements through as singletons while the control stream's latest
/// value is `false`; collects while it is `true` and flushes when it turns
/// back to `false`.
pub struct BufferCollecting<St, C, T> {
    source: Fuse<St>,
    control: Fuse<C>,
    collecting: bool,
    pending: Vec<T>,
    finished: bool,
}

impl<St: Unpin, C: Unpin, T> Unpin for BufferCollecting<St, C, T> {}

impl<St, C, T, E> BufferCollecting<St, C, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    C: Stream<Item = Result<bool, E>> + Unpin,
{
    pub fn new(source: St, is_collecting: C) -> Self {
        Self {
            source: source.fuse(),
            control: is_collecting.fuse(),
            collecting: false,
            pending: Vec::new(),
            finished: false,
        }
    }

    fn flush(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.pending))
        }
    }
}

impl<St, C, T, E> Stream for BufferCollecting<St, C, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    C: Stream<Item = Result<bool, E>> + Unpin,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.collecting {
                        this.pending.push(value);
                        continue;
                    }
                    return Poll::Ready(Some(Ok(vec![value])));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(this.flush().map(Ok));
                }
                Poll::Pending => {}
            }

            match ready!(this.control.poll_next_unpin(cx)) {
                Some(Ok(collecting)) => {
                    let was_collecting = mem::replace(&mut this.collecting, collecting);
                    if was_collecting && !collecting {
                        if let Some(flushed) = this.flush() {
                            return Poll::Ready(Some(Ok(flushed)));
                        }
                    }
                }
                Some(Err(err)) => {
                    this.finished = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    let flushed = if this.collecting { this.flush() } else { None };
                    return Poll::Ready(flushed.map(Ok));
                }
            }
        }
    }
}

/// Grows the current buffer while `should_include(buffer, candidate)` holds;
/// otherwise emits it and starts a new one seeded with the candidate.
pub struct BufferWhile<St, F, T> {
    source: Fuse<St>,
    should_include: F,
    current: Vec<T>,
    finished: bool,
}

impl<St: Unpin, F, T> Unpin for BufferWhile<St, F, T> {}

impl<St, F, T, E> BufferWhile<St, F, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    F: FnMut(&[T], &T) -> bool,
{
    pub fn new(source: St, should_include: F) -> Self {
        Self {
            source: source.fuse(),
            should_include,
            current: Vec::new(),
            finished: false,
        }
    }
}

impl<St, F, T, E> Stream for BufferWhile<St, F, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    F: FnMut(&[T], &T) -> bool,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.source.poll_next_unpin(cx)) {
                Some(Ok(value)) => {
                    if (this.should_include)(&this.current, &value) {
                        this.current.push(value);
                        continue;
                    }
                    let full = mem::replace(&mut this.current, vec![value]);
                    if !full.is_empty() {
                        return Poll::Ready(Some(Ok(full)));
                    }
                }
                Some(Err(err)) => {
                    this.finished = true;
                    this.current.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    if this.current.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(mem::take(&mut this.current))));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/buffers_tests.rs"]
mod tests;
