//! Keyed in-flight call deduplication
//!
//! Concurrent callers for the same key share one future's result. Used by
//! the extractor cache (per session id) and the snapshot loader (per
//! container tag).

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Deduplicates concurrent async calls by key
pub struct SingleFlight<K, V> {
    inflight: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `work` for `key`, or wait for an identical in-flight call.
    ///
    /// The entry is dropped once the call completes, so a later call for
    /// the same key runs fresh. Callers wanting memoization keep their own
    /// cache in front.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(work).await.clone();

        // Only drop the entry if it is still the cell this caller joined;
        // a straggler must not evict a newer in-flight cell for the key.
        self.inflight.remove_if(&key, |_, v| Arc::ptr_eq(v, &cell));
        value
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let flight = Arc::new(SingleFlight::<String, usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("key".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_fresh() {
        let flight = SingleFlight::<u32, u32>::new();
        let a = flight.run(1, || async { 1 }).await;
        let b = flight.run(1, || async { 2 }).await;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}
