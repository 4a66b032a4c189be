//! Feedback-loop state machines over asynchronous event streams.
//!
//! [`Engine`] folds inputs through a reducer and feeds each step to a set of
//! reactions whose output re-enters the loop. The reaction combinators in
//! [`reaction`] control how many effects run at once, and the remaining
//! modules coordinate effects from the outside: named cancellation
//! ([`EffectRegistry`]), a busy signal ([`ActivityTracker`]) and an error
//! side channel ([`ErrorRouter`]).

pub mod activity;
pub mod engine;
pub mod error;
pub mod error_router;
pub mod reaction;
pub mod registry;

pub use activity::{ActivityTracker, Tracked};
pub use engine::{
    cycle, Completion, Cycle, CycleOptions, Engine, InputStream, PairStream, Reaction, Reducer,
};
pub use error::CycleError;
pub use error_router::{ErrorRouter, Rerouted};
pub use reaction::{ignorable, mergable, reaction, stackable, stoppable, when, Activity, Payload};
pub use registry::{Cancelable, EffectRegistry};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
