//! Id-keyed cancellation of running effects.
//!
//! [`EffectRegistry`] is an explicitly owned context object: clone it into
//! whatever needs to start or cancel effects. The table is guarded by one
//! lock that is held only while the table is edited; abort handles are
//! fired after it is released.

use std::{
    collections::HashMap,
    future,
    hash::Hash,
    mem,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use futures::{
    stream::{self, AbortHandle, Abortable, BoxStream},
    Stream, StreamExt,
};
use tracing::{debug, trace};

struct Entry {
    token: u64,
    handle: AbortHandle,
}

struct Table<K> {
    entries: HashMap<K, Vec<Entry>>,
    next_token: u64,
}

pub struct EffectRegistry<K> {
    table: Arc<Mutex<Table<K>>>,
}

impl<K> Clone for EffectRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K: Hash + Eq> Default for EffectRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq> EffectRegistry<K> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                entries: HashMap::new(),
                next_token: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<K>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks `effect` under `id` from its first poll until it ends or is
    /// dropped. With `cancel_in_flight`, everything already tracked under
    /// `id` is canceled before `effect` starts. A canceled effect completes
    /// without emitting anything further.
    pub fn cancelable<St>(&self, effect: St, id: K, cancel_in_flight: bool) -> Cancelable<St, K>
    where
        St: Stream + Unpin,
    {
        Cancelable {
            registry: self.clone(),
            id: Some(id),
            cancel_in_flight,
            pending: Some(effect),
            running: None,
            registration: None,
        }
    }

    /// Stream that, when first polled, cancels everything tracked under `id`
    /// and completes without emitting.
    pub fn cancel<T, E>(&self, id: K) -> BoxStream<'static, Result<T, E>>
    where
        K: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let registry = self.clone();
        stream::once(async move {
            registry.cancel_now(&id);
        })
        .filter_map(|()| future::ready(None::<Result<T, E>>))
        .boxed()
    }

    /// Cancels everything tracked under `id` and returns how many effects
    /// that was.
    pub fn cancel_now(&self, id: &K) -> usize {
        let removed = self.lock().entries.remove(id).unwrap_or_default();
        for entry in &removed {
            entry.handle.abort();
        }
        if !removed.is_empty() {
            debug!(canceled = removed.len(), "registry: effects canceled");
        }
        removed.len()
    }

    pub fn cancel_all(&self) -> usize {
        let removed: Vec<Entry> = self
            .lock()
            .entries
            .drain()
            .flat_map(|(_, entries)| entries)
            .collect();
        for entry in &removed {
            entry.handle.abort();
        }
        debug!(canceled = removed.len(), "registry: all effects canceled");
        removed.len()
    }

    pub fn is_tracking(&self, id: &K) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Number of ids with at least one live effect.
    pub fn tracked_ids(&self) -> usize {
        self.lock().entries.len()
    }

    /// Adds `handle` under `id`. With `replace`, whatever was tracked under
    /// `id` is taken out in the same lock section and aborted once the lock
    /// is released, so two replacing effects can never both stay live.
    fn register(&self, id: K, handle: AbortHandle, replace: bool) -> u64 {
        let (token, replaced) = {
            let mut table = self.lock();
            let token = table.next_token;
            table.next_token += 1;
            let entries = table.entries.entry(id).or_default();
            let replaced = if replace {
                mem::take(entries)
            } else {
                Vec::new()
            };
            entries.push(Entry { token, handle });
            (token, replaced)
        };
        for entry in &replaced {
            entry.handle.abort();
        }
        if !replaced.is_empty() {
            debug!(canceled = replaced.len(), "registry: in-flight effects replaced");
        }
        trace!(token, "registry: effect registered");
        token
    }

    fn unregister(&self, id: &K, token: u64) {
        let mut table = self.lock();
        let Some(entries) = table.entries.get_mut(id) else {
            return;
        };
        entries.retain(|entry| entry.token != token);
        if entries.is_empty() {
            table.entries.remove(id);
        }
        trace!(token, "registry: effect unregistered");
    }
}

/// Removes its registry entry when dropped.
struct Registration<K: Hash + Eq> {
    registry: EffectRegistry<K>,
    id: K,
    token: u64,
}

impl<K: Hash + Eq> Drop for Registration<K> {
    fn drop(&mut self) {
        self.registry.unregister(&self.id, self.token);
    }
}

/// Stream returned by [`EffectRegistry::cancelable`].
pub struct Cancelable<St, K: Hash + Eq> {
    registry: EffectRegistry<K>,
    id: Option<K>,
    cancel_in_flight: bool,
    pending: Option<St>,
    running: Option<Abortable<St>>,
    registration: Option<Registration<K>>,
}

impl<St: Unpin, K: Hash + Eq> Unpin for Cancelable<St, K> {}

impl<St, K> Cancelable<St, K>
where
    St: Stream + Unpin,
    K: Hash + Eq + Clone,
{
    fn start(&mut self) {
        let (Some(effect), Some(id)) = (self.pending.take(), self.id.take()) else {
            return;
        };
        let (handle, abort_registration) = AbortHandle::new_pair();
        let token = self
            .registry
            .register(id.clone(), handle, self.cancel_in_flight);
        self.running = Some(Abortable::new(effect, abort_registration));
        self.registration = Some(Registration {
            registry: self.registry.clone(),
            id,
            token,
        });
    }

    fn release(&mut self) {
        self.running = None;
        self.registration = None;
    }
}

impl<St, T, E, K> Stream for Cancelable<St, K>
where
    St: Stream<Item = Result<T, E>> + Unpin,
    K: Hash + Eq + Clone,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.start();
        let Some(running) = this.running.as_mut() else {
            return Poll::Ready(None);
        };
        match futures::ready!(running.poll_next_unpin(cx)) {
            Some(Ok(value)) => Poll::Ready(Some(Ok(value))),
            Some(Err(err)) => {
                this.release();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.release();
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
