use std::{
    future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{trace, warn};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

struct TrackerState {
    count: Mutex<usize>,
    transitions: broadcast::Sender<bool>,
}

/// Reference-counted busy signal. Every stream wrapped with
/// [`ActivityTracker::track`] counts as one unit of activity from its first
/// poll until it ends or is dropped.
#[derive(Clone)]
pub struct ActivityTracker {
    state: Arc<TrackerState>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(TrackerState {
                count: Mutex::new(0),
                transitions,
            }),
        }
    }

    fn count(&self) -> MutexGuard<'_, usize> {
        self.state.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emits the current busy flag, then every change of it. Consecutive
    /// duplicates are never emitted.
    pub fn is_active(&self) -> BoxStream<'static, bool> {
        let (current, receiver) = {
            let count = self.count();
            (*count > 0, self.state.transitions.subscribe())
        };
        let mut last = None;
        stream::once(future::ready(current))
            .chain(BroadcastStream::new(receiver).filter_map(|transition| {
                future::ready(match transition {
                    Ok(active) => Some(active),
                    // The newest transitions are kept, so the flag stays right.
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        trace!(skipped, "activity: observer lagged");
                        None
                    }
                })
            }))
            .filter(move |active| {
                let changed = last != Some(*active);
                last = Some(*active);
                future::ready(changed)
            })
            .boxed()
    }

    pub fn current_count(&self) -> usize {
        *self.count()
    }

    pub fn is_active_now(&self) -> bool {
        self.current_count() > 0
    }

    pub fn track<St>(&self, source: St) -> Tracked<St> {
        Tracked {
            source,
            tracker: self.clone(),
            token: None,
            finished: false,
        }
    }

    fn increment(&self) -> ActivityToken {
        let mut count = self.count();
        *count += 1;
        trace!(count = *count, "activity: tracked stream started");
        if *count == 1 {
            let _ = self.state.transitions.send(true);
        }
        ActivityToken {
            tracker: self.clone(),
        }
    }

    fn decrement(&self) {
        let mut count = self.count();
        let Some(next) = count.checked_sub(1) else {
            warn!("activity: decrement without matching increment");
            return;
        };
        *count = next;
        trace!(count = next, "activity: tracked stream ended");
        if next == 0 {
            let _ = self.state.transitions.send(false);
        }
    }
}

/// Decrements the tracker exactly once, on drop.
struct ActivityToken {
    tracker: ActivityTracker,
}

impl Drop for ActivityToken {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

/// Stream returned by [`ActivityTracker::track`].
pub struct Tracked<St> {
    source: St,
    tracker: ActivityTracker,
    token: Option<ActivityToken>,
    finished: bool,
}

impl<St: Unpin> Unpin for Tracked<St> {}

impl<St, T, E> Stream for Tracked<St>
where
    St: Stream<Item = Result<T, E>> + Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.token.is_none() {
            this.token = Some(this.tracker.increment());
        }
        match futures::ready!(this.source.poll_next_unpin(cx)) {
            Some(Ok(value)) => Poll::Ready(Some(Ok(value))),
            Some(Err(err)) => {
                this.finished = true;
                this.token = None;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.finished = true;
                this.token = None;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/activity_tests.rs"]
mod tests;
