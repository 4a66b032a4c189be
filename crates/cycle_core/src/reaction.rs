//! Reactions built from a [`Payload`] and an effect.
//!
//! Every combinator here turns `(state, input)` pairs into actions with
//! `payload.action`, starts effects for them under one concurrency policy and
//! maps each effect result back into an input with `payload.result`. A
//! reaction stream ends once its pairs have ended and no effect is running;
//! the first effect error ends it with that error.

use std::{
    collections::VecDeque,
    future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    stream::{BoxStream, Fuse, SelectAll},
    Stream, StreamExt, TryStreamExt,
};
use tracing::trace;

use crate::engine::{InputStream, PairStream, Reaction};

type ActionFn<S, I, A> = Arc<dyn Fn(&S, &I) -> Option<A> + Send + Sync>;
type ResultFn<I, A, R> = Arc<dyn Fn(&A, R) -> I + Send + Sync>;

/// Selects an action for a `(state, input)` pair and folds the action's
/// result back into an input. `action` returning `None` means "nothing to
/// do for this input".
pub struct Payload<S, I, A, R> {
    action: ActionFn<S, I, A>,
    result: ResultFn<I, A, R>,
}

impl<S, I, A, R> Clone for Payload<S, I, A, R> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            result: self.result.clone(),
        }
    }
}

impl<S, I, A, R> Payload<S, I, A, R> {
    pub fn new(
        action: impl Fn(&S, &I) -> Option<A> + Send + Sync + 'static,
        result: impl Fn(&A, R) -> I + Send + Sync + 'static,
    ) -> Self {
        Self {
            action: Arc::new(action),
            result: Arc::new(result),
        }
    }
}

/// Action type for [`stoppable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity<A> {
    /// Cancel whatever is running and start an effect for this action.
    Restart(A),
    /// Cancel whatever is running without starting anything.
    Stop,
}

/// Runs an effect for every action; overlapping effects all run and their
/// results are merged in completion order.
pub fn mergable<S, I, A, R, E, F, Fx>(payload: Payload<S, I, A, R>, effect: F) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    policy_reaction(payload, effect, Policy::Merge)
}

/// Same as [`mergable`].
pub fn reaction<S, I, A, R, E, F, Fx>(payload: Payload<S, I, A, R>, effect: F) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    mergable(payload, effect)
}

/// Drops every action that arrives while an effect is in flight.
pub fn ignorable<S, I, A, R, E, F, Fx>(payload: Payload<S, I, A, R>, effect: F) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    policy_reaction(payload, effect, Policy::Exhaust)
}

/// Queues actions and runs their effects one at a time, in arrival order.
/// The effect for a queued action is created when it starts, not when the
/// action arrives.
pub fn stackable<S, I, A, R, E, F, Fx>(payload: Payload<S, I, A, R>, effect: F) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    policy_reaction(payload, effect, Policy::Concat)
}

/// Keeps only the latest effect alive: [`Activity::Restart`] replaces the
/// running effect and [`Activity::Stop`] cancels it. `payload.result` sees
/// the `Restart` that launched the effect.
pub fn stoppable<S, I, A, R, E, F, Fx>(
    payload: Payload<S, I, Activity<A>, R>,
    effect: F,
) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    let Payload { action, result } = payload;
    let effect = Arc::new(effect);
    let launch: Launch<Activity<A>, I, E> = Arc::new(move |activity: Activity<A>| {
        let Activity::Restart(value) = activity.clone() else {
            return futures::stream::empty().boxed();
        };
        let result = result.clone();
        effect(value)
            .map_ok(move |output| result(&activity, output))
            .boxed()
    });
    Arc::new(move |pairs: PairStream<S, I>| {
        let action = action.clone();
        let commands = pairs
            .filter_map(move |(state, input)| {
                let command = match action(&state, &input) {
                    Some(Activity::Stop) => Some(Command::Stop),
                    Some(restart) => Some(Command::Start(restart)),
                    None => None,
                };
                future::ready(command)
            })
            .boxed();
        EffectDriver::new(commands, launch.clone(), Policy::Switch).boxed()
    })
}

/// Starts `effect` every time `predicate` holds for a pair; effects are
/// merged.
pub fn when<S, I, E, P, F, Fx>(predicate: P, effect: F) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    E: Send + 'static,
    P: Fn(&S, &I) -> bool + Send + Sync + 'static,
    F: Fn() -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<I, E>> + Send + 'static,
{
    let payload = Payload::new(
        move |state: &S, input: &I| predicate(state, input).then_some(()),
        |_: &(), input: I| input,
    );
    mergable(payload, move |()| effect())
}

fn policy_reaction<S, I, A, R, E, F, Fx>(
    payload: Payload<S, I, A, R>,
    effect: F,
    policy: Policy,
) -> Reaction<S, I, E>
where
    S: Send + 'static,
    I: Send + 'static,
    A: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fx + Send + Sync + 'static,
    Fx: Stream<Item = Result<R, E>> + Send + 'static,
{
    let Payload { action, result } = payload;
    let launch: Launch<A, I, E> = Arc::new(move |value: A| {
        let result = result.clone();
        let kept = value.clone();
        effect(value)
            .map_ok(move |output| result(&kept, output))
            .boxed()
    });
    Arc::new(move |pairs: PairStream<S, I>| {
        let action = action.clone();
        let commands = pairs
            .filter_map(move |(state, input)| {
                future::ready(action(&state, &input).map(Command::Start))
            })
            .boxed();
        EffectDriver::new(commands, launch.clone(), policy).boxed()
    })
}

type Launch<A, I, E> = Arc<dyn Fn(A) -> InputStream<I, E> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Merge,
    Switch,
    Exhaust,
    Concat,
}

enum Command<A> {
    Start(A),
    Stop,
}

struct EffectDriver<A, I, E> {
    commands: Fuse<BoxStream<'static, Command<A>>>,
    launch: Launch<A, I, E>,
    policy: Policy,
    /// Effects under [`Policy::Merge`].
    running: SelectAll<InputStream<I, E>>,
    /// The single effect of every other policy.
    current: Option<InputStream<I, E>>,
    queued: VecDeque<A>,
    finished: bool,
}

impl<A, I, E> Unpin for EffectDriver<A, I, E> {}

impl<A, I, E> EffectDriver<A, I, E> {
    fn new(commands: BoxStream<'static, Command<A>>, launch: Launch<A, I, E>, policy: Policy) -> Self {
        Self {
            commands: commands.fuse(),
            launch,
            policy,
            running: SelectAll::new(),
            current: None,
            queued: VecDeque::new(),
            finished: false,
        }
    }

    fn on_command(&mut self, command: Command<A>) {
        match (self.policy, command) {
            (Policy::Merge, Command::Start(value)) => self.running.push((self.launch)(value)),
            (Policy::Switch, Command::Start(value)) => {
                if self.current.is_some() {
                    trace!("reaction: running effect replaced");
                }
                self.current = Some((self.launch)(value));
            }
            (Policy::Switch, Command::Stop) => {
                if self.current.take().is_some() {
                    trace!("reaction: running effect stopped");
                }
            }
            (Policy::Exhaust, Command::Start(value)) => {
                if self.current.is_some() {
                    trace!("reaction: effect in flight, action dropped");
                } else {
                    self.current = Some((self.launch)(value));
                }
            }
            (Policy::Concat, Command::Start(value)) => {
                if self.current.is_some() {
                    self.queued.push_back(value);
                } else {
                    self.current = Some((self.launch)(value));
                }
            }
            (_, Command::Stop) => {}
        }
    }

    fn fail(&mut self) {
        self.finished = true;
        self.current = None;
        self.running = SelectAll::new();
        self.queued.clear();
    }
}

impl<A, I, E> Stream for EffectDriver<A, I, E> {
    type Item = Result<I, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            if let Poll::Ready(Some(command)) = this.commands.poll_next_unpin(cx) {
                this.on_command(command);
                continue;
            }

            if let Some(current) = this.current.as_mut() {
                match current.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(input))) => return Poll::Ready(Some(Ok(input))),
                    Poll::Ready(Some(Err(err))) => {
                        this.fail();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.current = this.queued.pop_front().map(|value| (this.launch)(value));
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            if !this.running.is_empty() {
                match this.running.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(input))) => return Poll::Ready(Some(Ok(input))),
                    Poll::Ready(Some(Err(err))) => {
                        this.fail();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) | Poll::Pending => {}
                }
            }

            let idle = this.current.is_none() && this.running.is_empty();
            if this.commands.is_done() && idle {
                this.finished = true;
                return Poll::Ready(None);
            }
            return Poll::Pending;
        }
    }
}

#[cfg(test)]
#[path = "tests/reaction_tests.rs"]
mod tests;
