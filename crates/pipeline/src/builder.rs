//! Concurrent request building for stages whose items need a realtime call

use std::future::Future;

use futures_util::{StreamExt, TryStreamExt, stream};

use clinsynth_core::{PipelineError, WorkItem, ensure_unique};

/// Build `count` items with at most `limit` generator calls in flight.
///
/// Items come back in index order. The first failure aborts the build.
pub async fn build_concurrent<F, Fut>(
    count: usize,
    limit: usize,
    make: F,
) -> Result<Vec<WorkItem>, PipelineError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<WorkItem, PipelineError>>,
{
    let items: Vec<WorkItem> = stream::iter(0..count)
        .map(make)
        .buffered(limit.max(1))
        .try_collect()
        .await?;
    ensure_unique(&items)?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsynth_core::row_id;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn bounded_in_flight_and_ordered() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (in_flight, peak) = (&in_flight, &peak);

        let items = build_concurrent(20, 3, |i| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(((20 - i) % 4) as u64)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(WorkItem::new(row_id(i), "p", Map::new()))
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.correlation_id, row_id(i));
        }
    }

    #[tokio::test]
    async fn generator_failure_aborts() {
        let err = build_concurrent(5, 2, |i| async move {
            if i == 3 {
                Err(PipelineError::Transport("no".into()))
            } else {
                Ok(WorkItem::new(row_id(i), "p", Map::new()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let err = build_concurrent(2, 2, |_| async { Ok(WorkItem::new("same", "p", Map::new())) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
