//! Time-sensitive stream operators: windowed buffers, debouncing and gating.
//!
//! Sources are `Stream<Item = Result<T, E>>`. `Ok` is an element, `Err` is
//! the terminal error event and the end of the stream is completion. Each
//! operator is subscribed on its first poll and released when dropped; all
//! timers it owns go with it.

use std::time::Duration;

use futures::Stream;

pub mod buffers;
pub mod debounce;
pub mod error;
pub mod scheduler;
pub mod stall;

pub use buffers::{BufferBoundary, BufferCollecting, BufferCount, BufferTime, BufferWhile};
pub use debounce::{AccumulatingDebounce, DynamicDebounce, ThrottleDebounceLatest};
pub use error::OperatorError;
pub use scheduler::{Periodic, Scheduler, TokioScheduler};
pub use stall::Stall;

pub trait TemporalStreamExt<T, E>: Stream<Item = Result<T, E>> + Sized + Unpin {
    /// See [`BufferCount`].
    fn buffer_count(self, count: usize, skip: usize) -> Result<BufferCount<Self, T>, OperatorError> {
        BufferCount::new(self, count, skip)
    }

    /// See [`BufferTime`].
    fn buffer_time<Sch: Scheduler>(
        self,
        time_span: Duration,
        time_shift: Duration,
        scheduler: Sch,
    ) -> Result<BufferTime<Self, Sch, T>, OperatorError> {
        BufferTime::new(self, time_span, time_shift, scheduler)
    }

    /// See [`BufferBoundary`].
    fn buffer_boundary<B, U>(self, boundary: B) -> BufferBoundary<Self, B, T>
    where
        B: Stream<Item = Result<U, E>> + Unpin,
    {
        BufferBoundary::new(self, boundary)
    }

    /// See [`BufferCollecting`].
    fn buffer_collecting<C>(self, is_collecting: C) -> BufferCollecting<Self, C, T>
    where
        C: Stream<Item = Result<bool, E>> + Unpin,
    {
        BufferCollecting::new(self, is_collecting)
    }

    /// See [`BufferWhile`].
    fn buffer_while<F>(self, should_include: F) -> BufferWhile<Self, F, T>
    where
        F: FnMut(&[T], &T) -> bool,
    {
        BufferWhile::new(self, should_include)
    }

    /// See [`AccumulatingDebounce`].
    fn accumulating_debounce<Sch: Scheduler>(
        self,
        due_time: Duration,
        scheduler: Sch,
    ) -> AccumulatingDebounce<Self, Sch, T> {
        AccumulatingDebounce::new(self, due_time, scheduler)
    }

    /// See [`ThrottleDebounceLatest`].
    fn throttle_debounce_latest<Sch: Scheduler>(
        self,
        due_time: Duration,
        scheduler: Sch,
    ) -> ThrottleDebounceLatest<Self, Sch, T> {
        ThrottleDebounceLatest::new(self, due_time, scheduler)
    }

    /// See [`DynamicDebounce`].
    fn dynamic_debounce<F, Sch>(self, due_time: F, scheduler: Sch) -> DynamicDebounce<Self, Sch, F, T>
    where
        F: FnMut(&T) -> Duration,
        Sch: Scheduler,
    {
        DynamicDebounce::new(self, due_time, scheduler)
    }

    /// See [`Stall`].
    fn stall_unless<C>(self, unless: C, initial: bool) -> Stall<Self, C, T>
    where
        C: Stream<Item = Result<bool, E>> + Unpin,
    {
        Stall::new(self, unless, initial)
    }
}

impl<St, T, E> TemporalStreamExt<T, E> for St where St: Stream<Item = Result<T, E>> + Unpin {}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
