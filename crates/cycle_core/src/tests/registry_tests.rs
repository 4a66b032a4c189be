use std::sync::Arc;

use futures::{poll, StreamExt};
use tokio::{
    sync::Barrier,
    time::{sleep_until, Instant},
};

use super::*;
use crate::test_support::{marbles, record, secs, Boom};

fn letters(values: &[(u64, &str)]) -> Vec<(u64, Result<String, Boom>)> {
    values
        .iter()
        .map(|(at, value)| (*at, Ok(value.to_string())))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn cancelable_effect_passes_through_and_unregisters_on_completion() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let effect = registry.cancelable(marbles(origin, "--A|"), "test", false);

    let (items, completed_at) = record(origin, 10, effect).await;

    assert_eq!(items, letters(&[(2, "A")]));
    assert_eq!(completed_at, Some(3));
    assert!(!registry.is_tracking(&"test"));
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_unfinished_effect_before_it_emits() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let effect = registry.cancelable(marbles(origin, "---A|"), "test", false);
    let canceler = registry.clone();

    let ((items, completed_at), cancel_items) = tokio::join!(record(origin, 10, effect), async {
        sleep_until(origin + secs(2)).await;
        canceler
            .cancel::<String, Boom>("test")
            .collect::<Vec<_>>()
            .await
    });

    assert!(items.is_empty());
    assert_eq!(completed_at, Some(2));
    assert!(cancel_items.is_empty());
    assert_eq!(registry.tracked_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn effects_sharing_an_id_run_side_by_side() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let first = registry.cancelable(marbles(origin, "---A|"), "test", false);

    let ((first_items, _), (second_items, _)) = tokio::join!(record(origin, 10, first), async {
        sleep_until(origin + secs(2)).await;
        let second = registry.cancelable(marbles(Instant::now(), "---A|"), "test", false);
        record(origin, 10, second).await
    });

    assert_eq!(first_items, letters(&[(3, "A")]));
    assert_eq!(second_items, letters(&[(5, "A")]));
}

#[tokio::test(start_paused = true)]
async fn cancel_in_flight_replaces_earlier_effect_with_same_id() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let first = registry.cancelable(marbles(origin, "---A|"), "test", true);

    let ((first_items, first_done), (second_items, _)) =
        tokio::join!(record(origin, 10, first), async {
            sleep_until(origin + secs(2)).await;
            let second = registry.cancelable(marbles(Instant::now(), "---A|"), "test", true);
            record(origin, 10, second).await
        });

    assert!(first_items.is_empty());
    assert_eq!(first_done, Some(2));
    assert_eq!(second_items, letters(&[(5, "A")]));
}

#[tokio::test(start_paused = true)]
async fn cancel_of_unknown_id_completes_empty() {
    let registry = EffectRegistry::<&'static str>::new();

    let emitted: Vec<Result<(), Boom>> = registry.cancel("nobody").collect().await;

    assert!(emitted.is_empty());
    assert_eq!(registry.cancel_now(&"nobody"), 0);
}

#[tokio::test(start_paused = true)]
async fn registration_is_lazy_and_released_on_drop() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let mut effect = registry.cancelable(marbles(origin, "---A|"), 7_u32, false);
    assert!(!registry.is_tracking(&7));

    assert!(poll!(effect.next()).is_pending());
    assert!(registry.is_tracking(&7));
    assert_eq!(registry.tracked_ids(), 1);

    drop(effect);
    assert!(!registry.is_tracking(&7));
}

#[tokio::test(start_paused = true)]
async fn cancel_all_clears_every_id() {
    let origin = Instant::now();
    let registry = EffectRegistry::new();
    let mut first = registry.cancelable(marbles(origin, "---A|"), "one", false);
    let mut second = registry.cancelable(marbles(origin, "---B|"), "two", false);
    assert!(poll!(first.next()).is_pending());
    assert!(poll!(second.next()).is_pending());

    assert_eq!(registry.cancel_all(), 2);

    assert_eq!(registry.tracked_ids(), 0);
    assert!(first.next().await.is_none());
    assert!(second.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_in_flight_starts_leave_one_effect_live() {
    const TASKS: usize = 8;

    for _ in 0..200 {
        let registry = EffectRegistry::new();
        let started = Arc::new(Barrier::new(TASKS));
        let registered = Arc::new(Barrier::new(TASKS));

        let tasks: Vec<_> = (0..TASKS)
            .map(|_| {
                let registry = registry.clone();
                let started = started.clone();
                let registered = registered.clone();
                tokio::spawn(async move {
                    let mut effect = registry.cancelable(
                        futures::stream::pending::<Result<(), Boom>>(),
                        "search",
                        true,
                    );
                    started.wait().await;
                    assert!(poll!(effect.next()).is_pending());
                    registered.wait().await;
                    poll!(effect.next()).is_pending()
                })
            })
            .collect();

        let mut live = 0;
        for task in tasks {
            if task.await.expect("effect task") {
                live += 1;
            }
        }
        assert_eq!(live, 1);
    }
}
