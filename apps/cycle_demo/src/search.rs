//! "Search as you type": keystrokes are throttled into queries, every query
//! restarts a simulated catalogue lookup, and the results fold back into the
//! search state.

use std::time::Duration;

use anyhow::{bail, Context};
use cycle_core::{
    stoppable, Activity, ActivityTracker, Completion, CycleError, CycleOptions, EffectRegistry,
    Engine, ErrorRouter, InputStream, Payload, Reaction,
};
use futures::{stream, StreamExt};
use serde::Serialize;
use stream_ops::{TemporalStreamExt, TokioScheduler};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::config::Settings;

/// Registry id shared by every lookup, so a new lookup cancels the previous
/// one.
pub const LOOKUP_ID: &str = "lookup";

const CATALOGUE: &[&str] = &[
    "rust",
    "rustc",
    "rustdoc",
    "rustup",
    "ruby",
    "serde",
    "serde_json",
    "tokio",
    "tokio-stream",
    "tracing",
    "tracing-subscriber",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Typed(String),
    Cleared,
    Loaded { query: String, results: Vec<String> },
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<String>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub lookups: usize,
}

pub fn reduce(state: &mut SearchState, input: &Input) {
    match input {
        Input::Typed(query) => {
            state.query = query.clone();
            state.loading = true;
            state.last_error = None;
            state.lookups += 1;
        }
        Input::Cleared => {
            state.query.clear();
            state.results.clear();
            state.loading = false;
        }
        // Results for an older query are stale.
        Input::Loaded { query, results } if *query == state.query => {
            state.results = results.clone();
            state.loading = false;
        }
        Input::Loaded { .. } => {}
        Input::Failed(message) => {
            state.results.clear();
            state.last_error = Some(message.clone());
            state.loading = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub at: Duration,
    pub input: Input,
}

pub fn parse_script(raw: &str) -> anyhow::Result<Vec<ScriptStep>> {
    let mut steps: Vec<ScriptStep> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((millis, text)) = entry.split_once(':') else {
            bail!("script entry '{entry}' is not of the form millis:text");
        };
        let at = Duration::from_millis(
            millis
                .trim()
                .parse()
                .with_context(|| format!("script entry '{entry}' has an invalid time"))?,
        );
        if steps.last().is_some_and(|previous| previous.at > at) {
            bail!("script entry '{entry}' is earlier than the entry before it");
        }
        let text = text.trim();
        let input = if text.is_empty() {
            Input::Cleared
        } else {
            Input::Typed(text.to_string())
        };
        steps.push(ScriptStep { at, input });
    }
    Ok(steps)
}

/// Replays `steps` from now and throttles them the way a text field would.
pub fn keystrokes(steps: Vec<ScriptStep>, debounce: Duration) -> InputStream<Input, CycleError> {
    let origin = Instant::now();
    stream::unfold(steps.into_iter(), move |mut rest| async move {
        let step = rest.next()?;
        sleep_until(origin + step.at).await;
        debug!(input = ?step.input, "search: keystroke");
        Some((Ok::<_, CycleError>(step.input), rest))
    })
    .boxed()
    .throttle_debounce_latest(debounce, TokioScheduler)
    .boxed()
}

/// Simulated catalogue lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub latency: Duration,
    pub failing_query: Option<String>,
}

impl Lookup {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            latency: Duration::from_millis(settings.lookup_latency_ms),
            failing_query: settings.failing_query.clone(),
        }
    }

    pub fn run(&self, query: String) -> InputStream<Input, CycleError> {
        let latency = self.latency;
        let fails = self.failing_query.as_deref() == Some(query.as_str());
        stream::once(async move {
            sleep(latency).await;
            if fails {
                return Err(CycleError::effect(format!("lookup for '{query}' failed")));
            }
            let results = CATALOGUE
                .iter()
                .filter(|entry| entry.starts_with(query.as_str()))
                .map(|entry| entry.to_string())
                .collect();
            Ok(Input::Loaded { query, results })
        })
        .boxed()
    }
}

/// Coordination objects shared between the engine and whoever observes it.
#[derive(Clone)]
pub struct SearchContext {
    pub registry: EffectRegistry<&'static str>,
    pub activity: ActivityTracker,
    pub errors: ErrorRouter<CycleError>,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchContext {
    pub fn new() -> Self {
        Self {
            registry: EffectRegistry::new(),
            activity: ActivityTracker::new(),
            errors: ErrorRouter::new(),
        }
    }
}

/// A new query restarts the lookup and clearing stops it. A failed lookup
/// is routed to `context.errors` and folds back as [`Input::Failed`].
pub fn lookup_reaction(
    context: &SearchContext,
    lookup: Lookup,
) -> Reaction<SearchState, Input, CycleError> {
    let SearchContext {
        registry,
        activity,
        errors,
    } = context.clone();
    stoppable(
        Payload::new(
            |_: &SearchState, input: &Input| match input {
                Input::Typed(query) => Some(Activity::Restart(query.clone())),
                Input::Cleared => Some(Activity::Stop),
                Input::Loaded { .. } | Input::Failed(_) => None,
            },
            |_: &Activity<String>, input: Input| input,
        ),
        move |query: String| {
            let guarded = errors.reroute_or(lookup.run(query), |error: &CycleError| {
                Input::Failed(error.to_string())
            });
            registry.cancelable(activity.track(guarded), LOOKUP_ID, true)
        },
    )
}

pub fn search_engine(
    settings: &Settings,
    context: &SearchContext,
) -> Engine<SearchState, Input, CycleError> {
    let completion = if settings.drain_feedback {
        Completion::DrainFeedback
    } else {
        Completion::OutsideInputs
    };
    Engine::new(SearchState::default(), reduce)
        .with_reaction(lookup_reaction(context, Lookup::from_settings(settings)))
        .with_options(CycleOptions { completion })
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;
