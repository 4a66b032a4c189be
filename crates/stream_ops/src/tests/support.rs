//! Virtual-time timelines for operator tests.
//!
//! A diagram such as `"-A-B|"` is read one character per second: a letter
//! is an element, `#` an error, `|` completion and `-` silence. A diagram
//! without `|` or `#` never completes.

use std::time::Duration;

use futures::{
    future,
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use tokio::time::{sleep_until, timeout_at, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Boom(pub &'static str);

pub(crate) enum Marble<T> {
    Next(u64, T),
    Fail(u64, &'static str),
    Done(u64),
}

pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub(crate) fn timeline<T: Send + 'static>(
    origin: Instant,
    marbles: Vec<Marble<T>>,
) -> BoxStream<'static, Result<T, Boom>> {
    stream::unfold(marbles.into_iter(), move |mut rest| async move {
        match rest.next() {
            Some(Marble::Next(at, value)) => {
                sleep_until(origin + secs(at)).await;
                Some((Ok(value), rest))
            }
            Some(Marble::Fail(at, message)) => {
                sleep_until(origin + secs(at)).await;
                Some((Err(Boom(message)), rest))
            }
            Some(Marble::Done(at)) => {
                sleep_until(origin + secs(at)).await;
                None
            }
            None => {
                future::pending::<()>().await;
                None
            }
        }
    })
    .boxed()
}

pub(crate) fn marbles(origin: Instant, diagram: &str) -> BoxStream<'static, Result<String, Boom>> {
    let mut events = Vec::new();
    for (at, ch) in diagram.chars().enumerate() {
        let at = at as u64;
        match ch {
            '-' => {}
            '|' => {
                events.push(Marble::Done(at));
                break;
            }
            '#' => {
                events.push(Marble::Fail(at, "boom"));
                events.push(Marble::Done(at));
                break;
            }
            other => events.push(Marble::Next(at, other.to_string())),
        }
    }
    timeline(origin, events)
}

pub(crate) struct Recorded<T> {
    pub events: Vec<(u64, Result<T, Boom>)>,
    /// `None` when the stream was still open at the horizon.
    pub completed_at: Option<u64>,
}

impl<T: Clone> Recorded<T> {
    pub(crate) fn values(&self) -> Vec<(u64, T)> {
        self.events
            .iter()
            .filter_map(|(at, item)| item.as_ref().ok().map(|value| (*at, value.clone())))
            .collect()
    }
}

/// Drains `stream`, stamping each item with whole seconds since `origin`.
/// Gives up at `origin + horizon` seconds.
pub(crate) async fn record<S, T>(origin: Instant, horizon: u64, stream: S) -> Recorded<T>
where
    S: Stream<Item = Result<T, Boom>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut events = Vec::new();
    let deadline = origin + secs(horizon);
    loop {
        match timeout_at(deadline, stream.next()).await {
            Ok(Some(item)) => events.push((origin.elapsed().as_secs(), item)),
            Ok(None) => {
                return Recorded {
                    events,
                    completed_at: Some(origin.elapsed().as_secs()),
                }
            }
            Err(_) => {
                return Recorded {
                    events,
                    completed_at: None,
                }
            }
        }
    }
}

pub(crate) fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
