//! Time source and timers used by every time-sensitive operator.
//!
//! A pending [`Scheduler::Sleep`] is the cancel handle for a scheduled action:
//! dropping it (or replacing it with a new one) cancels the action. Operators
//! keep at most one armed timer per purpose, so a re-arm is always
//! last-writer-wins.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::time::Instant;

pub trait Scheduler: Clone + Send + Sync + Unpin + 'static {
    type Sleep: Future<Output = ()> + Send + 'static;

    /// Monotonic clock of this scheduler.
    fn now(&self) -> Instant;

    fn sleep_until(&self, deadline: Instant) -> Self::Sleep;

    fn schedule_after(&self, due: Duration) -> Self::Sleep {
        self.sleep_until(self.now() + due)
    }

    /// Ticks first after `start_after`, then every `period`.
    fn schedule_periodic(&self, start_after: Duration, period: Duration) -> Periodic<Self> {
        Periodic::new(self.clone(), self.now() + start_after, period)
    }
}

/// Scheduler backed by the tokio timer wheel. Deterministic under a paused
/// tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    type Sleep = tokio::time::Sleep;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> Self::Sleep {
        tokio::time::sleep_until(deadline)
    }
}

/// Stream of tick instants produced by [`Scheduler::schedule_periodic`].
/// Never ends on its own; drop it to cancel.
pub struct Periodic<Sch: Scheduler> {
    scheduler: Sch,
    next: Instant,
    period: Duration,
    sleep: Pin<Box<Sch::Sleep>>,
}

impl<Sch: Scheduler> Periodic<Sch> {
    fn new(scheduler: Sch, first: Instant, period: Duration) -> Self {
        let sleep = Box::pin(scheduler.sleep_until(first));
        Self {
            scheduler,
            next: first,
            period,
            sleep,
        }
    }
}

impl<Sch: Scheduler> Stream for Periodic<Sch> {
    type Item = Instant;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Instant>> {
        let this = self.get_mut();
        futures::ready!(this.sleep.as_mut().poll(cx));
        let fired_at = this.scheduler.now();
        this.next += this.period;
        this.sleep = Box::pin(this.scheduler.sleep_until(this.next));
        Poll::Ready(Some(fired_at))
    }
}

/// Single re-armable timer slot.
pub(crate) struct Timer<Sch: Scheduler> {
    sleep: Option<Pin<Box<Sch::Sleep>>>,
}

impl<Sch: Scheduler> Timer<Sch> {
    pub(crate) fn idle() -> Self {
        Self { sleep: None }
    }

    /// Replaces whatever was armed before.
    pub(crate) fn arm(&mut self, scheduler: &Sch, deadline: Instant) {
        self.sleep = Some(Box::pin(scheduler.sleep_until(deadline)));
    }

    pub(crate) fn cancel(&mut self) {
        self.sleep = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Ready once when the armed deadline passes; an idle timer never fires.
    pub(crate) fn poll_fire(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let Some(sleep) = self.sleep.as_mut() else {
            return Poll::Pending;
        };
        futures::ready!(sleep.as_mut().poll(cx));
        self.sleep = None;
        Poll::Ready(())
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
