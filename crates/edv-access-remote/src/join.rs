//! Bounded fan-out over independent remote lookups.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

/// Run `f` over `items` with at most `limit` futures in flight.
///
/// Results keep the order of `items`. The first error aborts the join.
pub async fn join_bounded<I, F, Fut, T, E>(items: I, limit: usize, f: F) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_preserves_order() {
        let out: Vec<u64> = join_bounded(vec![30u64, 10, 20], 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ()>(ms)
        })
        .await
        .unwrap();
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_respects_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        join_bounded(0..12, 3, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_error_aborts() {
        let result = join_bounded(1..=4, 0, |n| async move {
            if n == 3 {
                Err(format!("item {}", n))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Err("item 3".to_string()));
    }
}
