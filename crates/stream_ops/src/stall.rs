use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use futures::stream::{Fuse, Stream, StreamExt};
use tracing::trace;

/// Holds source elements back while the control stream's latest value is
/// `false`.
///
/// A switch to `true` releases the held elements oldest first and resumes
/// pass-through. Once the control stream completes the gate stays open. A
/// source that completes while elements are held keeps the output open until
/// the gate opens.
pub struct Stall<St, C, T> {
    source: Fuse<St>,
    control: Fuse<C>,
    open: bool,
    held: VecDeque<T>,
    releasing: VecDeque<T>,
    source_done: bool,
    control_done: bool,
    finished: bool,
}

impl<St: Unpin, C: Unpin, T> Unpin for Stall<St, C, T> {}

impl<St, C, T, E> Stall<St, C, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    C: Stream<Item = Result<bool, E>> + Unpin,
{
    pub fn new(source: St, unless: C, initial: bool) -> Self {
        Self {
            source: source.fuse(),
            control: unless.fuse(),
            open: initial,
            held: VecDeque::new(),
            releasing: VecDeque::new(),
            source_done: false,
            control_done: false,
            finished: false,
        }
    }

    fn open_gate(&mut self) {
        self.open = true;
        trace!(released = self.held.len(), "stall: gate opened");
        self.releasing.extend(self.held.drain(..));
        if self.source_done {
            self.finished = true;
        }
    }

    fn fail(&mut self) {
        self.finished = true;
        self.held.clear();
        self.releasing.clear();
    }
}

impl<St, C, T, E> Stream for Stall<St, C, T>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    C: Stream<Item = Result<bool, E>> + Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(value) = this.releasing.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            if !this.source_done {
                match this.source.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        if this.open {
                            return Poll::Ready(Some(Ok(value)));
                        }
                        this.held.push_back(value);
                        continue;
                    }
                    Poll::Ready(Some(Err(err))) => {
                        this.fail();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.source_done = true;
                        if this.held.is_empty() {
                            this.finished = true;
                        }
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            if this.control_done {
                return Poll::Pending;
            }
            match this.control.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(true))) => {
                    if !this.open {
                        this.open_gate();
                    }
                }
                Poll::Ready(Some(Ok(false))) => {
                    if this.open {
                        trace!("stall: gate closed");
                    }
                    this.open = false;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.fail();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.control_done = true;
                    this.open_gate();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/stall_tests.rs"]
mod tests;
