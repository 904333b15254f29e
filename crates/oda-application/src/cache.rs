use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use oda_core::{OdaError, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Attempt<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    /// Construction started; every requester awaits the same handle.
    Pending { attempt: u64, handle: Attempt<V> },
    Ready(V),
}

type Entries<K, V> = Arc<Mutex<HashMap<K, Slot<V>>>>;

/// Keyed cache for expensive, asynchronously constructed resources.
///
/// Concurrent requests for the same key share one construction attempt;
/// different keys construct independently. Successes are memoized, failures
/// are not: a failed attempt removes its entry so the next request starts
/// over.
pub struct SingleFlightCache<K, V> {
    entries: Entries<K, V>,
    next_attempt: AtomicU64,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Returns the value for `key`, constructing it with `factory` if needed.
    ///
    /// `factory` is only called when no entry exists; a caller that arrives
    /// while construction is pending joins that attempt and receives the
    /// same value or the same error. The factory runs without the cache lock
    /// held, so it may query the cache itself.
    ///
    /// # Errors
    ///
    /// The factory's error, delivered to every waiter of the failed attempt.
    pub async fn get_or_create<F, Fut>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (handle, start) = {
            let mut entries = lock(&self.entries);
            match entries.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Pending { handle, .. }) => {
                    tracing::debug!(key = ?key, "Joining in-flight construction");
                    (handle.clone(), None)
                }
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = ?key, attempt, "Starting construction");

                    // The factory runs after the lock is released and hands
                    // its future over through `start`.
                    let (start, construction) = oneshot::channel::<Fut>();
                    let settle_entries = Arc::clone(&self.entries);
                    let settle_key = key.clone();
                    let handle = async move {
                        let result = match construction.await {
                            Ok(construction) => construction.await,
                            Err(_) => Err(OdaError::construction("construction abandoned")),
                        };
                        settle(&settle_entries, &settle_key, attempt, &result);
                        result
                    }
                    .boxed()
                    .shared();

                    entries.insert(
                        key,
                        Slot::Pending {
                            attempt,
                            handle: handle.clone(),
                        },
                    );
                    (handle, Some(start))
                }
            }
        };

        if let Some(start) = start {
            // The receiver lives inside `handle`, which is still held here
            let _ = start.send(factory());
        }

        handle.await
    }

    /// True only when `key` holds a constructed value.
    pub fn has(&self, key: &K) -> bool {
        matches!(lock(&self.entries).get(key), Some(Slot::Ready(_)))
    }

    /// The constructed value for `key`, without starting construction.
    pub fn get(&self, key: &K) -> Option<V> {
        match lock(&self.entries).get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// True while construction for `key` is in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        matches!(lock(&self.entries).get(key), Some(Slot::Pending { .. }))
    }

    /// Evicts `key`. An in-flight attempt still resolves for its waiters but
    /// is no longer recorded.
    pub fn remove(&self, key: &K) -> Option<V> {
        match lock(&self.entries).remove(key) {
            Some(Slot::Ready(value)) => Some(value),
            _ => None,
        }
    }

    /// Keys whose construction has completed.
    pub fn ready_keys(&self) -> Vec<K> {
        lock(&self.entries)
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of entries, pending ones included.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Clears all entries.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Records the outcome of `attempt`, unless the entry was evicted or replaced.
fn settle<K, V>(entries: &Entries<K, V>, key: &K, attempt: u64, result: &Result<V>)
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    let mut entries = lock(entries);
    let current = matches!(
        entries.get(key),
        Some(Slot::Pending { attempt: pending, .. }) if *pending == attempt
    );
    if !current {
        tracing::debug!(key = ?key, attempt, "Construction settled after eviction");
        return;
    }

    match result {
        Ok(value) => {
            entries.insert(key.clone(), Slot::Ready(value.clone()));
        }
        Err(e) => {
            tracing::warn!(key = ?key, attempt, error = %e, "Construction failed");
            entries.remove(key);
        }
    }
}

fn lock<K, V>(entries: &Entries<K, V>) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    type Pair = (String, String);

    fn pair(source: &str, target: &str) -> Pair {
        (source.to_string(), target.to_string())
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_construction() {
        let cache: SingleFlightCache<Pair, Arc<String>> = SingleFlightCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let requests = (0..8).map(|_| {
            let calls = calls.clone();
            let gate = gate.clone();
            cache.get_or_create(pair("en", "fr"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(Arc::new("en-fr pipeline".to_string()))
            })
        });

        let (results, _) = tokio::join!(futures::future::join_all(requests), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert!(cache.has(&pair("en", "fr")));
    }

    #[tokio::test]
    async fn test_sequential_requests_reuse_value() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_create(pair("en", "fr"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_create(pair("en", "fr"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OdaError::construction("download interrupted")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OdaError::ResourceConstruction(_)));
        assert!(!cache.has(&pair("en", "fr")));
        assert!(cache.is_empty());

        let value = cache
            .get_or_create(pair("en", "fr"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(3) }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let requests = (0..3).map(|_| {
            cache.get_or_create(pair("en", "de"), || async {
                tokio::task::yield_now().await;
                Err(OdaError::construction("no space left"))
            })
        });

        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(|r| r.is_err()));
        assert!(!cache.is_pending(&pair("en", "de")));
    }

    #[tokio::test]
    async fn test_keys_compare_on_both_components() {
        let cache: SingleFlightCache<Pair, &'static str> = SingleFlightCache::new();
        cache
            .get_or_create(pair("en", "fr"), || async { Ok("en->fr") })
            .await
            .unwrap();

        assert!(!cache.has(&pair("fr", "en")));
        assert!(!cache.has(&pair("en", "es")));
        let reversed = cache
            .get_or_create(pair("fr", "en"), || async { Ok("fr->en") })
            .await
            .unwrap();
        assert_eq!(reversed, "fr->en");
        assert_eq!(cache.ready_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_wait_on_each_other() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let gate = Arc::new(Notify::new());

        let slow_gate = gate.clone();
        let slow = cache.get_or_create(pair("en", "ja"), move || async move {
            slow_gate.notified().await;
            Ok(1)
        });
        let fast = async {
            let value = cache
                .get_or_create(pair("en", "ko"), || async { Ok(2) })
                .await
                .unwrap();
            assert!(cache.is_pending(&pair("en", "ja")));
            gate.notify_one();
            value
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap(), 1);
        assert_eq!(fast, 2);
    }

    #[tokio::test]
    async fn test_removed_pending_entry_is_not_resurrected() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let gate = Arc::new(Notify::new());

        let wait = gate.clone();
        let pending = cache.get_or_create(pair("en", "it"), move || async move {
            wait.notified().await;
            Ok(5)
        });
        let evict = async {
            tokio::task::yield_now().await;
            assert_eq!(cache.remove(&pair("en", "it")), None);
            gate.notify_one();
        };

        let (value, _) = tokio::join!(pending, evict);
        assert_eq!(value.unwrap(), 5);
        assert!(!cache.has(&pair("en", "it")));
    }

    #[tokio::test]
    async fn test_factory_may_query_the_cache() {
        let cache: SingleFlightCache<Pair, bool> = SingleFlightCache::new();
        let key = pair("en", "fr");

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.get_or_create(key.clone(), || {
                let pending = cache.is_pending(&pair("en", "fr"));
                let known = cache.has(&pair("en", "fr"));
                async move { Ok(pending && !known) }
            }),
        )
        .await
        .expect("Should not block while the factory inspects the cache");

        assert!(outcome.unwrap());
        assert!(cache.has(&key));
    }

    #[tokio::test]
    async fn test_factory_may_build_a_dependency_first() {
        let cache: SingleFlightCache<Pair, u32> = SingleFlightCache::new();
        let base = cache
            .get_or_create(pair("en", "de"), || {
                let known = cache.get(&pair("en", "fr"));
                async move { Ok(known.unwrap_or(10)) }
            })
            .await
            .unwrap();

        assert_eq!(base, 10);
        assert_eq!(cache.ready_keys(), vec![pair("en", "de")]);
    }
}
