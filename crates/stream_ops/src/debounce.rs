//! Burst suppression operators.
//!
//! When a source element and a timer are both ready at the same instant the
//! source element is handled first, so an element arriving exactly at a
//! deadline still restarts the window.

use std::{
    collections::VecDeque,
    mem,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{
    ready,
    stream::{Fuse, Stream, StreamExt},
};
use tokio::time::Instant;
use tracing::trace;

use crate::scheduler::{Scheduler, Timer};

/// Collects elements until `due_time` passes without a new one, then emits
/// the whole batch.
pub struct AccumulatingDebounce<St, Sch: Scheduler, T> {
    source: Fuse<St>,
    scheduler: Sch,
    due_time: Duration,
    batch: Vec<T>,
    timer: Timer<Sch>,
    finished: bool,
}

impl<St: Unpin, Sch: Scheduler, T> Unpin for AccumulatingDebounce<St, Sch, T> {}

impl<St, Sch, T, E> AccumulatingDebounce<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
{
    pub fn new(source: St, due_time: Duration, scheduler: Sch) -> Self {
        Self {
            source: source.fuse(),
            scheduler,
            due_time,
            batch: Vec::new(),
            timer: Timer::idle(),
            finished: false,
        }
    }
}

impl<St, Sch, T, E> Stream for AccumulatingDebounce<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
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
                    this.batch.push(value);
                    let deadline = this.scheduler.now() + this.due_time;
                    this.timer.arm(&this.scheduler, deadline);
                    continue;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.timer.cancel();
                    this.batch.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.timer.cancel();
                    if this.batch.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(mem::take(&mut this.batch))));
                }
                Poll::Pending => {}
            }

            ready!(this.timer.poll_fire(cx));
            if !this.batch.is_empty() {
                return Poll::Ready(Some(Ok(mem::take(&mut this.batch))));
            }
        }
    }
}

/// Leading-edge throttle with a debounced trailing edge.
///
/// The first element passes immediately. An element arriving within
/// `due_time` of the previous arrival is held and re-scheduled `due_time`
/// after its own arrival, replacing anything held before it. An element
/// arriving after a quiet period longer than `due_time` passes immediately.
pub struct ThrottleDebounceLatest<St, Sch: Scheduler, T> {
    source: Fuse<St>,
    scheduler: Sch,
    due_time: Duration,
    last_arrival: Option<Instant>,
    held: Option<T>,
    held_timer: Timer<Sch>,
    completion_timer: Timer<Sch>,
    ready: VecDeque<T>,
    source_done: bool,
    finished: bool,
}

impl<St: Unpin, Sch: Scheduler, T> Unpin for ThrottleDebounceLatest<St, Sch, T> {}

impl<St, Sch, T, E> ThrottleDebounceLatest<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
{
    pub fn new(source: St, due_time: Duration, scheduler: Sch) -> Self {
        Self {
            source: source.fuse(),
            scheduler,
            due_time,
            last_arrival: None,
            held: None,
            held_timer: Timer::idle(),
            completion_timer: Timer::idle(),
            ready: VecDeque::new(),
            source_done: false,
            finished: false,
        }
    }

    fn on_element(&mut self, value: T) {
        let now = self.scheduler.now();
        let window_open = self
            .last_arrival
            .map_or(true, |last| now.saturating_duration_since(last) > self.due_time);
        self.last_arrival = Some(now);
        if window_open {
            // Anything still held is older than this element.
            self.held_timer.cancel();
            self.ready.extend(self.held.take());
            self.ready.push_back(value);
        } else {
            if self.held.is_some() {
                trace!("throttle: held element replaced by a newer one");
            }
            self.held = Some(value);
            self.held_timer.arm(&self.scheduler, now + self.due_time);
        }
    }
}

impl<St, Sch, T, E> Stream for ThrottleDebounceLatest<St, Sch, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(value) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            if !this.source_done {
                match this.source.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        this.on_element(value);
                        continue;
                    }
                    Poll::Ready(Some(Err(err))) => {
                        this.finished = true;
                        this.held = None;
                        this.held_timer.cancel();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.source_done = true;
                        if this.held_timer.is_armed() {
                            let deadline = this.scheduler.now() + this.due_time;
                            this.completion_timer.arm(&this.scheduler, deadline);
                        } else {
                            this.finished = true;
                        }
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            if this.held_timer.poll_fire(cx).is_ready() {
                if let Some(value) = this.held.take() {
                    return Poll::Ready(Some(Ok(value)));
                }
            }

            if this.source_done {
                ready!(this.completion_timer.poll_fire(cx));
                this.finished = true;
                this.ready.extend(this.held.take());
                continue;
            }

            return Poll::Pending;
        }
    }
}

/// Trailing-edge debounce whose quiet period is computed from each element.
pub struct DynamicDebounce<St, Sch: Scheduler, F, T> {
    source: Fuse<St>,
    scheduler: Sch,
    due_time: F,
    held: Option<T>,
    timer: Timer<Sch>,
    finished: bool,
}

impl<St: Unpin, Sch: Scheduler, F, T> Unpin for DynamicDebounce<St, Sch, F, T> {}

impl<St, Sch, F, T, E> DynamicDebounce<St, Sch, F, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
    F: FnMut(&T) -> Duration,
{
    pub fn new(source: St, due_time: F, scheduler: Sch) -> Self {
        Self {
            source: source.fuse(),
            scheduler,
            due_time,
            held: None,
            timer: Timer::idle(),
            finished: false,
        }
    }
}

impl<St, Sch, F, T, E> Stream for DynamicDebounce<St, Sch, F, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    Sch: Scheduler,
    F: FnMut(&T) -> Duration,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    let deadline = this.scheduler.now() + (this.due_time)(&value);
                    this.held = Some(value);
                    this.timer.arm(&this.scheduler, deadline);
                    continue;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    this.held = None;
                    this.timer.cancel();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.timer.cancel();
                    return Poll::Ready(this.held.take().map(Ok));
                }
                Poll::Pending => {}
            }

            ready!(this.timer.poll_fire(cx));
            if let Some(value) = this.held.take() {
                return Poll::Ready(Some(Ok(value)));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
