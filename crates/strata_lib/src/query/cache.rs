//! A read-through cache that lets concurrent identical lookups share one
//! backing fetch.
//!
//! Entries expire after a fixed time to live and are evicted least recently
//! used first once their estimated size exceeds a byte budget. Failed
//! fetches are never cached.
//!
//! Fetches run on their own task, so a fetch whose callers all went away
//! still finishes, releases what it holds and fills the cache.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use prometheus_exporter::prometheus::IntCounterVec;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::QueryError;

/// Estimated memory footprint of a cached value, in bytes.
pub trait CacheWeight {
    fn weight(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LookupOutcome {
    Hit,
    Miss,
    /// Joined a fetch started by another caller.
    Coalesced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub entries: usize,
    pub weight: usize,
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

struct Entry<V> {
    value: V,
    weight: usize,
    /// `None` when the time to live is too long to represent.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

struct State<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    total_weight: usize,
    /// Fetches in progress, tagged so that a finished fetch only removes
    /// its own entry.
    in_flight: HashMap<K, (u64, SharedFetch<V>)>,
    next_fetch_id: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

pub struct QueryCache<K: Hash + Eq, V> {
    name: &'static str,
    state: Arc<Mutex<State<K, V>>>,
    counters: Arc<Counters>,
    ttl: Duration,
    max_bytes: usize,
    lookups: IntCounterVec,
}

impl<K: Hash + Eq, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            state: self.state.clone(),
            counters: self.counters.clone(),
            ttl: self.ttl,
            max_bytes: self.max_bytes,
            lookups: self.lookups.clone(),
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for QueryCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl<K, V> QueryCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: CacheWeight + Clone + Send + Sync + 'static,
{
    /// `lookups` is labelled by [`LookupOutcome`]. `name` only shows up in
    /// logs.
    pub fn new(
        name: &'static str,
        ttl: Duration,
        max_bytes: usize,
        lookups: IntCounterVec,
    ) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(State {
                entries: LruCache::unbounded(),
                total_weight: 0,
                in_flight: HashMap::new(),
                next_fetch_id: 0,
            })),
            counters: Arc::new(Counters::default()),
            ttl,
            max_bytes,
            lookups,
        }
    }

    /// Returns the cached value for `key`, or the result of `fetch`. If a
    /// fetch for `key` is already running, waits for that one instead and
    /// `fetch` is dropped without being polled.
    ///
    /// Must be called within a Tokio runtime. Dropping the returned future
    /// doesn't cancel the fetch.
    pub async fn get_or_fetch<F>(&self, key: K, fetch: F) -> Result<V, QueryError>
    where
        F: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let (fetch_id, shared) = {
            let mut state = self.state.lock();

            let now = Instant::now();
            let cached = state
                .entries
                .get(&key)
                .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
            match cached {
                Some(Some(value)) => {
                    self.record(LookupOutcome::Hit);
                    return Ok(value);
                }
                Some(None) => {
                    if let Some(expired) = state.entries.pop(&key) {
                        state.total_weight -= expired.weight;
                    }
                }
                None => {}
            }

            match state.in_flight.get(&key) {
                Some((fetch_id, shared)) => {
                    self.record(LookupOutcome::Coalesced);
                    (*fetch_id, shared.clone())
                }
                None => {
                    self.record(LookupOutcome::Miss);
                    let fetch_id = state.next_fetch_id;
                    state.next_fetch_id += 1;

                    // The task can't complete before the entry is in the
                    // map, as completing takes the lock held here.
                    let cache = self.clone();
                    let task_key = key.clone();
                    let task = tokio::spawn(async move {
                        let result = fetch.await;
                        cache.complete(task_key, fetch_id, &result);
                        result
                    });
                    let shared = task.map(flatten_join).boxed().shared();
                    state
                        .in_flight
                        .insert(key.clone(), (fetch_id, shared.clone()));
                    (fetch_id, shared)
                }
            }
        };

        let result = shared.await;
        // Only reached first when the fetch task panicked or was aborted.
        self.complete(key, fetch_id, &result);
        result
    }

    /// Moves the result of a finished fetch from the in-flight map into the
    /// cache. Does nothing if that was done already.
    fn complete(&self, key: K, fetch_id: u64, result: &Result<V, QueryError>) {
        let mut state = self.state.lock();
        let ours = matches!(state.in_flight.get(&key), Some((current, _)) if *current == fetch_id);
        if !ours {
            return;
        }
        state.in_flight.remove(&key);

        if let Ok(value) = result {
            self.insert(&mut state, key, value.clone());
        }
    }

    fn insert(&self, state: &mut State<K, V>, key: K, value: V) {
        let weight = value.weight();
        if weight > self.max_bytes {
            debug!(weight, max_bytes = self.max_bytes, "Not caching oversized entry");
            return;
        }

        let entry = Entry {
            value,
            weight,
            expires_at: Instant::now().checked_add(self.ttl),
        };
        if let Some(replaced) = state.entries.put(key, entry) {
            state.total_weight -= replaced.weight;
        }
        state.total_weight += weight;

        while state.total_weight > self.max_bytes {
            let Some((_, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.total_weight -= evicted.weight;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record(&self, outcome: LookupOutcome) {
        let counter = match outcome {
            LookupOutcome::Hit => &self.counters.hits,
            LookupOutcome::Miss => &self.counters.misses,
            LookupOutcome::Coalesced => &self.counters.coalesced,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.lookups.with_label_values(&[outcome.as_ref()]).inc();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            weight: state.total_weight,
        }
    }

    /// Logs [`Self::stats`] every `interval`. A zero interval disables it.
    pub fn spawn_stats_logger(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let cache = self.clone();
        Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            loop {
                ticks.tick().await;
                let stats = cache.stats();
                info!(
                    cache = cache.name,
                    hits = stats.hits,
                    misses = stats.misses,
                    coalesced = stats.coalesced,
                    evictions = stats.evictions,
                    entries = stats.entries,
                    weight = stats.weight,
                    "Query cache statistics"
                );
            }
        }))
    }
}

impl std::ops::Add for CacheStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            coalesced: self.coalesced + other.coalesced,
            evictions: self.evictions + other.evictions,
            entries: self.entries + other.entries,
            weight: self.weight + other.weight,
        }
    }
}

fn flatten_join<V>(
    joined: Result<Result<V, QueryError>, tokio::task::JoinError>,
) -> Result<V, QueryError> {
    joined.unwrap_or_else(|err| {
        warn!(error = %err, "Query cache fetch did not finish");
        Err(anyhow::Error::new(err).context("fetch did not finish").into())
    })
}

impl CacheWeight for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::future::join_all;

    use super::*;
    use crate::test_utils::test_counter_vec;

    fn cache(ttl: Duration, max_bytes: usize) -> QueryCache<u32, String> {
        QueryCache::new("test", ttl, max_bytes, test_counter_vec(&["outcome"]))
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl Future<Output = Result<String, QueryError>> + Send + 'static {
        let calls = calls.clone();
        let value = value.to_string();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_lookup_is_a_hit() {
        let cache = cache(Duration::from_secs(60), 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_fetch(1, counting_fetch(&calls, "one")).await;
        let second = cache.get_or_fetch(1, counting_fetch(&calls, "uno")).await;

        assert_eq!(first.unwrap(), "one");
        assert_eq!(second.unwrap(), "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!((stats.entries, stats.weight), (1, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_share_one_fetch() {
        let cache = cache(Duration::from_secs(60), 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..8).map(|_| cache.get_or_fetch(7, counting_fetch(&calls, "seven")));
        let results = join_all(lookups).await;

        assert!(results.iter().all(|r| matches!(r.as_deref(), Ok("seven"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.misses, stats.coalesced), (1, 7));
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_waiter_and_are_not_cached() {
        let cache = cache(Duration::from_secs(60), 1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<String, _>(QueryError::Store(Arc::new(anyhow::anyhow!(
                    "database is down"
                ))))
            }
        };

        let results = join_all((0..3).map(|_| cache.get_or_fetch(1, failing()))).await;
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let retried = cache.get_or_fetch(1, counting_fetch(&calls, "one")).await;
        assert_eq!(retried.unwrap(), "one");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = cache(Duration::from_secs(10), 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch(1, counting_fetch(&calls, "one")).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.get_or_fetch(1, counting_fetch(&calls, "one")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().weight, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_is_evicted() {
        let cache = cache(Duration::from_secs(60), 10);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch(1, counting_fetch(&calls, "aaaa")).await.unwrap();
        cache.get_or_fetch(2, counting_fetch(&calls, "bbbb")).await.unwrap();
        // Touch 1, so that 2 is the least recently used.
        cache.get_or_fetch(1, counting_fetch(&calls, "aaaa")).await.unwrap();
        cache.get_or_fetch(3, counting_fetch(&calls, "cccc")).await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!((stats.entries, stats.weight), (2, 8));

        cache.get_or_fetch(1, counting_fetch(&calls, "aaaa")).await.unwrap();
        cache.get_or_fetch(2, counting_fetch(&calls, "bbbb")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_values_are_served_but_not_cached() {
        let cache = cache(Duration::from_secs(60), 4);
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache.get_or_fetch(1, counting_fetch(&calls, "too long")).await;

        assert_eq!(value.unwrap(), "too long");
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_outlives_cancelled_callers() {
        let cache = cache(Duration::from_secs(60), 1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(());
        let fetch = {
            let held = held.clone();
            let slow = counting_fetch(&calls, "one");
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                drop(held);
                slow.await
            }
        };

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.get_or_fetch(1, fetch)).await;
        assert!(timed_out.is_err());
        assert_eq!(cache.state.lock().in_flight.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(Arc::strong_count(&held), 1);
        assert!(cache.state.lock().in_flight.is_empty());
        assert_eq!(cache.stats().entries, 1);

        let value = cache.get_or_fetch(1, counting_fetch(&calls, "uno")).await;
        assert_eq!(value.unwrap(), "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_never_expires() {
        let cache = cache(Duration::from_secs(u64::MAX), 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch(1, counting_fetch(&calls, "one")).await.unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        cache.get_or_fetch(1, counting_fetch(&calls, "one")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn zero_interval_disables_stats_logging() {
        let cache = cache(Duration::from_secs(60), 1024);
        assert!(cache.spawn_stats_logger(Duration::ZERO).is_none());

        let handle = cache.spawn_stats_logger(Duration::from_secs(60)).unwrap();
        handle.abort();
    }
}
