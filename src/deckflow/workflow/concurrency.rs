// SPDX-License-Identifier: MIT

//! Bounded intra-node fan-out
//!
//! Both helpers keep at most `limit` futures past their permit at once and
//! return results in input order, whatever order they complete in. Neither
//! spawns: everything runs on the calling task, so borrowed data is fine.

use futures::future::{join_all, BoxFuture};
use std::future::Future;
use tokio::sync::Semaphore;

/// Run already-built futures with a concurrency ceiling
pub async fn bounded_join<'a, T>(tasks: Vec<BoxFuture<'a, T>>, limit: usize) -> Vec<T> {
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;

    join_all(tasks.into_iter().map(|task| async move {
        // acquire only fails on a closed semaphore, which never happens here
        let _permit = semaphore.acquire().await.ok();
        task.await
    }))
    .await
}

/// Map `f` over `items` with a concurrency ceiling.
///
/// `f` receives the item's index; the future it returns is only created once
/// a permit is held.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, limit: usize, f: F) -> Vec<T>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = T>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;
    let f = &f;

    join_all(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| async move {
                let _permit = semaphore.acquire().await.ok();
                f(index, item).await
            }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        // later items finish first
        let results = fan_out(vec![40u64, 30, 20, 10], 4, |i, ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            (i, ms)
        })
        .await;
        assert_eq!(results, vec![(0, 40), (1, 30), (2, 20), (3, 10)]);
    }

    #[tokio::test]
    async fn test_fan_out_respects_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        fan_out((0..8).collect::<Vec<_>>(), 3, |_, _| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bounded_join_with_borrowed_data() {
        let labels = vec!["title".to_string(), "body".to_string()];
        let tasks: Vec<BoxFuture<'_, usize>> = labels
            .iter()
            .map(|l| Box::pin(async move { l.len() }) as BoxFuture<'_, usize>)
            .collect();
        assert_eq!(bounded_join(tasks, 1).await, vec![5, 4]);
    }

    #[tokio::test]
    async fn test_zero_limit_treated_as_one() {
        let results = fan_out(vec![1, 2], 0, |_, x| async move { x * 2 }).await;
        assert_eq!(results, vec![2, 4]);
    }
}
