//! End-to-end "search as you type" loop: throttled keystrokes drive the
//! engine, lookups run as a stoppable reaction wrapped in the registry, the
//! activity tracker and the error router.

use std::time::Duration;

use cycle_core::{
    stoppable, Activity, ActivityTracker, CycleError, EffectRegistry, Engine, ErrorRouter,
    InputStream, Payload, Reaction,
};
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use stream_ops::{TemporalStreamExt, TokioScheduler};
use tokio::time::{sleep, sleep_until, timeout_at, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Typed(String),
    Cleared,
    Loaded { query: String, results: Vec<String> },
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Search {
    query: String,
    results: Vec<String>,
    loading: bool,
    error: Option<String>,
}

fn reduce(state: &mut Search, input: &Input) {
    match input {
        Input::Typed(query) => {
            state.query = query.clone();
            state.loading = true;
            state.error = None;
        }
        Input::Cleared => {
            state.query.clear();
            state.results.clear();
            state.loading = false;
        }
        Input::Loaded { query, results } if *query == state.query => {
            state.results = results.clone();
            state.loading = false;
        }
        Input::Loaded { .. } => {}
        Input::Failed(message) => {
            state.error = Some(message.clone());
            state.loading = false;
        }
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Emits each input at its second offset from `origin`, then completes at
/// `end`.
fn script(origin: Instant, events: Vec<(u64, Input)>, end: u64) -> BoxStream<'static, Result<Input, CycleError>> {
    stream::unfold(events.into_iter(), move |mut rest| async move {
        match rest.next() {
            Some((at, input)) => {
                sleep_until(origin + secs(at)).await;
                Some((Ok(input), rest))
            }
            None => {
                sleep_until(origin + secs(end)).await;
                None
            }
        }
    })
    .boxed()
}

/// Answers after three seconds; the query "err" fails instead.
fn lookup(query: String) -> InputStream<Input, CycleError> {
    stream::once(async move {
        sleep(secs(3)).await;
        if query == "err" {
            return Err(CycleError::effect(format!("lookup of {query} failed")));
        }
        let results = vec![format!("{query}-1"), format!("{query}-2")];
        Ok(Input::Loaded { query, results })
    })
    .boxed()
}

struct Harness {
    registry: EffectRegistry<&'static str>,
    tracker: ActivityTracker,
    router: ErrorRouter<CycleError>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: EffectRegistry::new(),
            tracker: ActivityTracker::new(),
            router: ErrorRouter::new(),
        }
    }

    fn lookup_reaction(&self) -> Reaction<Search, Input, CycleError> {
        let registry = self.registry.clone();
        let tracker = self.tracker.clone();
        let router = self.router.clone();
        stoppable(
            Payload::new(
                |_: &Search, input: &Input| match input {
                    Input::Typed(query) => Some(Activity::Restart(query.clone())),
                    Input::Cleared => Some(Activity::Stop),
                    _ => None,
                },
                |_: &Activity<String>, input: Input| input,
            ),
            move |query: String| {
                let guarded = router.reroute_or(lookup(query), |error: &CycleError| {
                    Input::Failed(error.to_string())
                });
                registry.cancelable(tracker.track(guarded), "lookup", true)
            },
        )
    }

    fn engine(&self) -> Engine<Search, Input, CycleError> {
        Engine::new(Search::default(), reduce).with_reaction(self.lookup_reaction())
    }
}

async fn collect_states(
    origin: Instant,
    horizon: u64,
    states: impl Stream<Item = Result<Search, CycleError>>,
) -> Vec<(u64, Search)> {
    let mut states = std::pin::pin!(states);
    let mut seen = Vec::new();
    while let Ok(Some(state)) = timeout_at(origin + secs(horizon), states.next()).await {
        seen.push((
            origin.elapsed().as_secs(),
            state.expect("search loop never fails"),
        ));
    }
    seen
}

fn typed(query: &str) -> Input {
    Input::Typed(query.to_string())
}

#[tokio::test(start_paused = true)]
async fn throttled_typing_restarts_lookup_and_keeps_latest_results() {
    let origin = Instant::now();
    let harness = Harness::new();
    let keystrokes = script(
        origin,
        vec![(1, typed("h")), (2, typed("he")), (3, typed("hel")), (7, typed("help"))],
        12,
    )
    .throttle_debounce_latest(secs(2), TokioScheduler);

    let states = collect_states(origin, 20, harness.engine().run([keystrokes.boxed()])).await;

    let queries: Vec<(u64, String, bool)> = states
        .iter()
        .map(|(at, state)| (*at, state.query.clone(), state.loading))
        .collect();
    assert_eq!(
        queries,
        vec![
            (0, String::new(), false),
            (1, "h".to_string(), true),
            (4, "h".to_string(), false),
            (5, "hel".to_string(), true),
            (7, "help".to_string(), true),
            (10, "help".to_string(), false),
        ]
    );
    let (_, last) = states.last().expect("final state");
    assert_eq!(last.results, vec!["help-1".to_string(), "help-2".to_string()]);
    assert_eq!(harness.tracker.current_count(), 0);
    assert_eq!(harness.registry.tracked_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_becomes_input_and_is_routed() {
    let origin = Instant::now();
    let harness = Harness::new();
    let mut errors = harness.router.error();
    let keystrokes = script(origin, vec![(1, typed("err"))], 6);

    let states = collect_states(origin, 20, harness.engine().run([keystrokes])).await;

    let (at, last) = states.last().expect("final state");
    assert_eq!(*at, 4);
    assert_eq!(last.error.as_deref(), Some("effect failed: lookup of err failed"));
    assert!(!last.loading);
    let routed = errors.next().await.expect("routed error");
    assert!(matches!(routed.as_ref(), CycleError::Effect(_)));
}

#[tokio::test(start_paused = true)]
async fn clearing_stops_the_running_lookup() {
    let origin = Instant::now();
    let harness = Harness::new();
    let keystrokes = script(origin, vec![(1, typed("abc")), (2, Input::Cleared)], 8);

    let states = collect_states(origin, 20, harness.engine().run([keystrokes])).await;

    assert!(states.iter().all(|(_, state)| state.results.is_empty()));
    assert_eq!(states.last().map(|(at, _)| *at), Some(2));
    assert_eq!(harness.tracker.current_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn registry_cancel_from_outside_drops_the_lookup() {
    let origin = Instant::now();
    let harness = Harness::new();
    let keystrokes = script(origin, vec![(1, typed("abc"))], 8);
    let registry = harness.registry.clone();

    let (states, canceled) = tokio::join!(
        collect_states(origin, 20, harness.engine().run([keystrokes])),
        async move {
            sleep_until(origin + secs(2)).await;
            registry.cancel_now(&"lookup")
        },
    );

    assert_eq!(canceled, 1);
    assert!(states.iter().all(|(_, state)| state.results.is_empty()));
    let (_, last) = states.last().expect("final state");
    assert!(last.loading);
}

#[tokio::test(start_paused = true)]
async fn activity_follows_lookup_lifetime() {
    let origin = Instant::now();
    let harness = Harness::new();
    let activity = harness.tracker.is_active();
    let keystrokes = script(origin, vec![(1, typed("a"))], 8);

    let run = harness.engine().run([keystrokes]);
    let (_, flags) = tokio::join!(collect_states(origin, 20, run), async {
        let mut activity = std::pin::pin!(activity);
        let mut flags = Vec::new();
        while let Ok(Some(flag)) = timeout_at(origin + secs(9), activity.next()).await {
            flags.push((origin.elapsed().as_secs(), flag));
        }
        flags
    });

    assert_eq!(flags, vec![(0, false), (1, true), (4, false)]);
}
