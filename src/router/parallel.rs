//! Bounded-concurrency fan-out for pre-caching.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use log::debug;

/// Run `task` over every item with at most `max_concurrent` in flight.
///
/// Unlike a fail-fast join, every item runs to completion; results come
/// back in input order.
pub async fn run_bounded<I, T, F, Fut>(items: Vec<I>, task: F, max_concurrent: usize) -> Vec<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    if items.is_empty() {
        return Vec::new();
    }

    let max_concurrent = max_concurrent.max(1);
    debug!(
        "Running {} tasks with max {} concurrent",
        items.len(),
        max_concurrent
    );

    let total = items.len();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut in_flight = FuturesUnordered::new();
    let mut pending = items.into_iter().enumerate();

    let start = |index: usize, item: I| {
        let fut = task(item);
        async move { (index, fut.await) }
    };

    for (index, item) in pending.by_ref().take(max_concurrent) {
        in_flight.push(start(index, item));
    }

    while let Some((index, result)) = in_flight.next().await {
        results[index] = Some(result);

        if let Some((next, item)) = pending.next() {
            in_flight.push(start(next, item));
        }
    }

    debug!("Completed {} tasks", total);
    results.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_bounded_empty() {
        let results: Vec<u32> = run_bounded(Vec::<u32>::new(), |n| async move { n }, 4).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_run_bounded_preserves_input_order() {
        let results = run_bounded(
            vec![30u64, 10, 20],
            |ms| async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
                ms
            },
            3,
        )
        .await;
        assert_eq!(results, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_run_bounded_respects_concurrency() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(
            vec![1, 2, 3, 4, 5],
            |n| {
                let concurrent = concurrent.clone();
                let max_observed = max_observed.clone();
                async move {
                    let current = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    n
                }
            },
            2,
        )
        .await;

        assert_eq!(results.len(), 5);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_run_bounded_keeps_failures() {
        let results: Vec<Result<u32, String>> = run_bounded(
            vec![1, 2, 3],
            |n| async move {
                if n == 2 {
                    Err("boom".to_string())
                } else {
                    Ok(n)
                }
            },
            10,
        )
        .await;

        assert_eq!(results.len(), 3);
        assert!(results[1].is_err());
    }
}
