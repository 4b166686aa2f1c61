//! Generic bounded-parallelism primitive.
//!
//! [`run_all`] fans a worker out over many items with a fixed concurrency
//! ceiling, starting a new invocation as soon as any in-flight one finishes.
//! Results come back in item order even though execution interleaves, so
//! callers can rely on `items[i] ↔ results[i]` correspondence. Used where
//! simple fixed-concurrency fan-out suffices and the 429/session machinery
//! of [`RateLimitFetcher`](crate::fetch::RateLimitFetcher) would be overkill.

use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream;

/// Run `worker` over every item with at most `limit` invocations in flight.
///
/// Individual worker outcomes are independent: have the worker return a
/// `Result` and a failing item will not stop its siblings.
pub async fn run_all<I, T, F, Fut, R>(limit: usize, items: I, worker: F) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items.into_iter().map(worker))
        .buffered(limit.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_item_order() {
        // Later items finish first; results must still line up with inputs.
        let results = run_all(4, [40u64, 30, 20, 10], |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms * 2
        })
        .await;
        assert_eq!(results, vec![80, 60, 40, 20]);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let _ = run_all(3, 0..20, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn a_failing_worker_does_not_stop_siblings() {
        let results = run_all(2, 0..5, |i| async move {
            if i == 2 { Err("boom") } else { Ok(i) }
        })
        .await;
        assert_eq!(results.len(), 5);
        assert_eq!(results[2], Err("boom"));
        assert_eq!(results[4], Ok(4));
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let results = run_all(0, [1, 2, 3], |i| async move { i }).await;
        assert_eq!(results, vec![1, 2, 3]);
    }
}
