//! Fresh-value cache with single-flight request coalescing.
//!
//! One `FreshCache` per resource class, each with its own TTL and key
//! space. A stale or missing key triggers exactly one upstream fetch no
//! matter how many callers ask concurrently; everyone awaits the same
//! outcome. Failures propagate to every waiter and are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tracing::debug;

use common::Error;

/// Fetch errors are shared between coalesced waiters.
pub type SharedError = Arc<Error>;

type InFlight<T> = Shared<BoxFuture<'static, Result<T, SharedError>>>;

/// A cached value with its fetch time.
#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    in_flight: HashMap<String, InFlight<T>>,
}

/// Freshness report for one cached key.
#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub key: String,
    pub fresh: bool,
    pub age: Duration,
}

/// Keyed TTL cache with single-flight coalescing.
pub struct FreshCache<T> {
    name: &'static str,
    ttl: Duration,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for FreshCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            ttl: self.ttl,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FreshCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key` if fresh, otherwise fetch.
    ///
    /// * A fresh entry returns immediately, without suspending.
    /// * If a fetch for `key` is already in flight, the caller awaits its
    ///   outcome instead of starting a second upstream call. This holds
    ///   for `force_refresh` callers too.
    /// * Otherwise `fetch` is started and registered as the in-flight
    ///   fetch. Success stores a new entry; failure clears the slot and
    ///   hands the same error to every waiter.
    pub async fn get_with<F, Fut>(
        &self,
        key: &str,
        force_refresh: bool,
        fetch: F,
    ) -> Result<T, SharedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let shared = {
            let mut inner = self.inner.lock().unwrap();

            if !force_refresh {
                if let Some(entry) = inner.entries.get(key) {
                    if entry.fetched_at.elapsed() < self.ttl {
                        return Ok(entry.value.clone());
                    }
                }
            }

            if let Some(in_flight) = inner.in_flight.get(key) {
                debug!("{}: coalescing onto in-flight fetch for '{}'", self.name, key);
                in_flight.clone()
            } else {
                debug!("{}: starting fetch for '{}'", self.name, key);
                // The closure only builds the future; nothing runs until
                // it is polled after the lock is released.
                let fut = fetch();
                let state = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let name = self.name;
                let shared: InFlight<T> = async move {
                    let result = fut.await;
                    let mut inner = state.lock().unwrap();
                    inner.in_flight.remove(&owned_key);
                    match result {
                        Ok(value) => {
                            inner.entries.insert(
                                owned_key,
                                Entry {
                                    value: value.clone(),
                                    fetched_at: Instant::now(),
                                },
                            );
                            Ok(value)
                        }
                        Err(e) => {
                            debug!("{}: fetch for '{}' failed: {}", name, owned_key, e);
                            Err(Arc::new(e))
                        }
                    }
                }
                .boxed()
                .shared();
                inner.in_flight.insert(key.to_string(), shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Drop the entry for `key`. An in-flight fetch is left alone: it may
    /// still complete and populate a fresh entry afterward (invalidation
    /// means "don't trust the old value", not "abort work in progress").
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(key).is_some() {
            debug!("{}: invalidated '{}'", self.name, key);
        }
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.entries.len();
        inner.entries.clear();
        if n > 0 {
            debug!("{}: invalidated {} entries", self.name, n);
        }
    }

    /// Freshness of every stored key. Non-blocking, no side effects.
    pub fn status(&self) -> Vec<EntryStatus> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .map(|(key, entry)| {
                let age = entry.fetched_at.elapsed();
                EntryStatus {
                    key: key.clone(),
                    fresh: age < self.ttl,
                    age,
                }
            })
            .collect()
    }

    /// Age of one key's entry, if present.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).map(|e| e.fetched_at.elapsed())
    }

    /// `true` iff an entry exists for `key` and is within its TTL.
    pub fn is_fresh(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(key)
            .map(|e| e.fetched_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    const KEY: &str = "BTC";

    fn counting_fetch(
        counter: &Arc<AtomicUsize>,
        value: u64,
        delay: Duration,
    ) -> impl Future<Output = Result<u64, Error>> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(delay).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_coalesce_to_one_fetch() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        let calls = (0..5).map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            async move {
                cache
                    .get_with(KEY, false, || {
                        counting_fetch(&fetches, 42, Duration::from_millis(50))
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1, "expected one upstream call");
        for r in results {
            assert_eq!(r.unwrap(), 42);
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_fetching() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_millis(80));
        let fetches = Arc::new(AtomicUsize::new(0));

        let v1 = cache
            .get_with(KEY, false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();
        let v2 = cache
            .get_with(KEY, false, || counting_fetch(&fetches, 2, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(v1, 1);
        assert_eq!(v2, 1, "second call must hit the cache");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_a_new_fetch() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_millis(50));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_with(KEY, false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();
        sleep(Duration::from_millis(70)).await;
        let v = cache
            .get_with(KEY, false, || counting_fetch(&fetches, 2, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(v, 2);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_a_fetch_inside_ttl() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_with(KEY, false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();
        cache.invalidate(KEY);
        let v = cache
            .get_with(KEY, false, || counting_fetch(&fetches, 2, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(v, 2);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_a_fresh_entry() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_with(KEY, false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();
        let v = cache
            .get_with(KEY, true, || counting_fetch(&fetches, 2, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(v, 2);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_coalesces_onto_in_flight_fetch() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        let slow = {
            let cache = cache.clone();
            let fetches = fetches.clone();
            tokio::spawn(async move {
                cache
                    .get_with(KEY, false, || {
                        counting_fetch(&fetches, 7, Duration::from_millis(80))
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;

        let forced = cache
            .get_with(KEY, true, || counting_fetch(&fetches, 8, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(forced, 7, "forced caller joins the in-flight fetch");
        assert_eq!(slow.await.unwrap().unwrap(), 7);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_reach_all_waiters_and_are_not_cached() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        let failing = |fetches: &Arc<AtomicUsize>| {
            let fetches = fetches.clone();
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                Err::<u64, _>(Error::Http("connection reset".into()))
            }
        };

        let calls = (0..3).map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            async move { cache.get_with(KEY, false, || failing(&fetches)).await }
        });
        let results = join_all(calls).await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        for r in results {
            assert!(r.is_err(), "every coalesced waiter sees the failure");
        }

        // The failure was not cached; the next call fetches again.
        let v = cache
            .get_with(KEY, false, || counting_fetch(&fetches, 9, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(v, 9);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_secs(60));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("BTC", false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();
        cache
            .get_with("ETH", false, || counting_fetch(&fetches, 2, Duration::ZERO))
            .await
            .unwrap();
        cache.invalidate("BTC");

        assert!(!cache.is_fresh("BTC"));
        assert!(cache.is_fresh("ETH"), "invalidating BTC must not touch ETH");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_reports_staleness_without_side_effects() {
        let cache: FreshCache<u64> = FreshCache::new("test", Duration::from_millis(50));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_with(KEY, false, || counting_fetch(&fetches, 1, Duration::ZERO))
            .await
            .unwrap();

        let status = cache.status();
        assert_eq!(status.len(), 1);
        assert!(status[0].fresh);

        sleep(Duration::from_millis(70)).await;

        let status = cache.status();
        assert!(!status[0].fresh, "entry past TTL reports stale");
        assert!(cache.age(KEY).unwrap() >= Duration::from_millis(50));
        assert_eq!(fetches.load(Ordering::SeqCst), 1, "status must not fetch");
    }
}
