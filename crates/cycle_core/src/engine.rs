//! The feedback state machine.
//!
//! A run folds every input through the reducer, one at a time, and emits the
//! state after each step. Each `(state before the step, input)` pair is sent
//! to every reaction over its own channel; whatever the reactions produce is
//! merged back in as feedback input. The channels are created per run, so
//! two runs of one [`Engine`] share nothing but the reducer and reaction
//! functions.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    channel::mpsc::{self, UnboundedSender},
    stream::{BoxStream, SelectAll},
    Stream, StreamExt,
};
use tracing::{debug, trace};

/// What a reaction observes: the state before a reduction and the input that
/// was reduced.
pub type PairStream<S, I> = BoxStream<'static, (S, I)>;

pub type InputStream<I, E> = BoxStream<'static, Result<I, E>>;

pub type Reaction<S, I, E> = Arc<dyn Fn(PairStream<S, I>) -> InputStream<I, E> + Send + Sync>;

pub type Reducer<S, I> = Arc<dyn Fn(&mut S, &I) + Send + Sync>;

/// When a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Completion {
    /// As soon as every outside input has completed and no feedback input
    /// is ready on the same poll. Feedback still in flight at that point is
    /// dropped.
    #[default]
    OutsideInputs,
    /// After the outside inputs complete, reactions stop receiving pairs but
    /// the effects they already started keep feeding the reducer. The run
    /// ends once every reaction stream has ended.
    DrainFeedback,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    pub completion: Completion,
}

/// Reusable description of a feedback loop. Each [`Engine::run`] starts an
/// independent run from the initial state.
pub struct Engine<S, I, E> {
    initial: S,
    reducer: Reducer<S, I>,
    reactions: Vec<Reaction<S, I, E>>,
    options: CycleOptions,
}

impl<S, I, E> Engine<S, I, E>
where
    S: Clone + Send + 'static,
    I: Clone + Send + 'static,
    E: Send + 'static,
{
    pub fn new(initial: S, reduce: impl Fn(&mut S, &I) + Send + Sync + 'static) -> Self {
        Self {
            initial,
            reducer: Arc::new(reduce),
            reactions: Vec::new(),
            options: CycleOptions::default(),
        }
    }

    pub fn with_reaction(mut self, reaction: Reaction<S, I, E>) -> Self {
        self.reactions.push(reaction);
        self
    }

    pub fn with_reactions(mut self, reactions: impl IntoIterator<Item = Reaction<S, I, E>>) -> Self {
        self.reactions.extend(reactions);
        self
    }

    pub fn with_options(mut self, options: CycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run<St>(&self, inputs: impl IntoIterator<Item = St>) -> Cycle<S, I, E>
    where
        St: Stream<Item = Result<I, E>> + Send + 'static,
    {
        Cycle::start(
            self.initial.clone(),
            self.reducer.clone(),
            inputs.into_iter().map(StreamExt::boxed).collect(),
            &self.reactions,
            self.options,
        )
    }
}

/// One-shot form of [`Engine::run`] with default options.
pub fn cycle<S, I, E, St>(
    inputs: impl IntoIterator<Item = St>,
    initial_state: S,
    reduce: impl Fn(&mut S, &I) + Send + Sync + 'static,
    reactions: Vec<Reaction<S, I, E>>,
) -> Cycle<S, I, E>
where
    S: Clone + Send + 'static,
    I: Clone + Send + 'static,
    E: Send + 'static,
    St: Stream<Item = Result<I, E>> + Send + 'static,
{
    Engine::new(initial_state, reduce)
        .with_reactions(reactions)
        .run(inputs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Running,
    Draining,
    Done,
}

/// State stream of one engine run. The first item is always the initial
/// state. Dropping it tears down every reaction and effect of the run.
pub struct Cycle<S, I, E> {
    state: S,
    reducer: Reducer<S, I>,
    outside: SelectAll<InputStream<I, E>>,
    feedback: SelectAll<InputStream<I, E>>,
    pair_senders: Vec<UnboundedSender<(S, I)>>,
    completion: Completion,
    phase: Phase,
    feedback_first: bool,
}

impl<S, I, E> Unpin for Cycle<S, I, E> {}

impl<S, I, E> Cycle<S, I, E>
where
    S: Clone + Send + 'static,
    I: Clone + Send + 'static,
    E: Send + 'static,
{
    fn start(
        initial: S,
        reducer: Reducer<S, I>,
        inputs: Vec<InputStream<I, E>>,
        reactions: &[Reaction<S, I, E>],
        options: CycleOptions,
    ) -> Self {
        debug!(
            inputs = inputs.len(),
            reactions = reactions.len(),
            completion = ?options.completion,
            "cycle: run created"
        );
        let mut pair_senders = Vec::with_capacity(reactions.len());
        let mut feedback = SelectAll::new();
        for reaction in reactions {
            let (sender, receiver) = mpsc::unbounded();
            pair_senders.push(sender);
            feedback.push(reaction(receiver.boxed()));
        }
        Self {
            state: initial,
            reducer,
            outside: futures::stream::select_all(inputs),
            feedback,
            pair_senders,
            completion: options.completion,
            phase: Phase::Initial,
            feedback_first: false,
        }
    }

    fn reduce(&mut self, input: I) -> S {
        let before = self.state.clone();
        (self.reducer)(&mut self.state, &input);
        self.pair_senders.retain(|sender| {
            let delivered = sender
                .unbounded_send((before.clone(), input.clone()))
                .is_ok();
            if !delivered {
                trace!("cycle: reaction stopped listening");
            }
            delivered
        });
        self.state.clone()
    }

    fn outside_completed(&mut self) -> bool {
        match self.completion {
            Completion::OutsideInputs => {
                debug!("cycle: outside inputs completed, run ends");
                true
            }
            Completion::DrainFeedback => {
                debug!("cycle: outside inputs completed, draining feedback");
                self.phase = Phase::Draining;
                self.pair_senders.clear();
                false
            }
        }
    }

    /// Next input from either side, alternating which side is asked first.
    /// `Ready(None)` means the run is over.
    fn poll_input(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<I, E>>> {
        loop {
            if self.phase == Phase::Draining {
                return self.feedback.poll_next_unpin(cx);
            }

            self.feedback_first = !self.feedback_first;
            if self.feedback_first {
                // An empty feedback set only matters once draining.
                if let Poll::Ready(Some(item)) = self.feedback.poll_next_unpin(cx) {
                    return Poll::Ready(Some(item));
                }
            }
            match self.outside.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => {
                    // Feedback already ready goes in first, whichever side
                    // this round asked first.
                    if self.completion == Completion::OutsideInputs {
                        if let Poll::Ready(Some(item)) = self.feedback.poll_next_unpin(cx) {
                            return Poll::Ready(Some(item));
                        }
                    }
                    if self.outside_completed() {
                        return Poll::Ready(None);
                    }
                    continue;
                }
                Poll::Pending => {}
            }
            if !self.feedback_first {
                if let Poll::Ready(Some(item)) = self.feedback.poll_next_unpin(cx) {
                    return Poll::Ready(Some(item));
                }
            }
            return Poll::Pending;
        }
    }
}

impl<S, I, E> Stream for Cycle<S, I, E>
where
    S: Clone + Send + 'static,
    I: Clone + Send + 'static,
    E: Send + 'static,
{
    type Item = Result<S, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.phase {
            Phase::Initial => {
                this.phase = Phase::Running;
                return Poll::Ready(Some(Ok(this.state.clone())));
            }
            Phase::Done => return Poll::Ready(None),
            Phase::Running | Phase::Draining => {}
        }

        match futures::ready!(this.poll_input(cx)) {
            Some(Ok(input)) => Poll::Ready(Some(Ok(this.reduce(input)))),
            Some(Err(err)) => {
                debug!("cycle: input or reaction failed, run ends");
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                if this.phase == Phase::Draining {
                    debug!("cycle: feedback drained, run ends");
                }
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl<S, I, E> Cycle<S, I, E> {
    fn finish(&mut self) {
        self.phase = Phase::Done;
        self.pair_senders.clear();
        self.outside = SelectAll::new();
        self.feedback = SelectAll::new();
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
