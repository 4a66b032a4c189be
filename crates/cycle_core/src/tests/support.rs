//! Virtual-time helpers shared by the unit tests. Diagrams are read one
//! character per second: a letter is an element, `#` an error, `|`
//! completion and `-` silence.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{
    future,
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use tokio::time::{sleep_until, timeout_at, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Boom(pub &'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Stream of `diagram`, timed from `origin`.
pub(crate) fn marbles(origin: Instant, diagram: &str) -> BoxStream<'static, Result<String, Boom>> {
    let mut events: Vec<(u64, Option<Result<String, Boom>>)> = Vec::new();
    for (at, ch) in diagram.chars().enumerate() {
        let at = at as u64;
        match ch {
            '-' => {}
            '|' => {
                events.push((at, None));
                break;
            }
            '#' => {
                events.push((at, Some(Err(Boom("boom")))));
                events.push((at, None));
                break;
            }
            other => events.push((at, Some(Ok(other.to_string())))),
        }
    }
    stream::unfold(events.into_iter(), move |mut rest| async move {
        match rest.next() {
            Some((at, item)) => {
                sleep_until(origin + secs(at)).await;
                item.map(|item| (item, rest))
            }
            None => {
                future::pending::<()>().await;
                None
            }
        }
    })
    .boxed()
}

/// Yields `value` once, `delay` seconds after its first poll, then
/// completes.
pub(crate) fn after(delay: u64, value: &str) -> BoxStream<'static, Result<String, Boom>> {
    let value = value.to_string();
    stream::once(async move {
        tokio::time::sleep(secs(delay)).await;
        Ok(value)
    })
    .boxed()
}

/// Drains `stream` until it ends or `origin + horizon` seconds pass,
/// stamping every item with whole seconds since `origin`. The second value
/// is the completion time, if the stream completed.
pub(crate) async fn record<S, T>(origin: Instant, horizon: u64, stream: S) -> (Vec<(u64, T)>, Option<u64>)
where
    S: Stream<Item = T>,
{
    let mut stream = std::pin::pin!(stream);
    let mut items = Vec::new();
    let deadline = origin + secs(horizon);
    loop {
        match timeout_at(deadline, stream.next()).await {
            Ok(Some(item)) => items.push((origin.elapsed().as_secs(), item)),
            Ok(None) => return (items, Some(origin.elapsed().as_secs())),
            Err(_) => return (items, None),
        }
    }
}

/// Shared log of the values an effect was started with.
#[derive(Clone, Default)]
pub(crate) struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub(crate) fn push(&self, value: impl Into<String>) {
        self.0.lock().expect("calls lock").push(value.into());
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.0.lock().expect("calls lock").clone()
    }
}
