//! Time-bounded cache with request collapsing.
//!
//! Every entry is either ready (value + expiry) or pending (a fill in
//! flight). Concurrent callers of the same key never trigger duplicate
//! upstream calls: the first caller claims the fill, the rest await its
//! broadcast outcome. Expiry is checked lazily on read; there is no
//! background eviction, the map is bounded by the universe of one run.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::data_source::FetchError;

type FillSignal<V> = Option<Result<V, FetchError>>;

enum Slot<V> {
    Ready { value: V, expires_at: Instant },
    Pending(watch::Receiver<FillSignal<V>>),
}

/// Hit/miss counters snapshot.
///
/// A hit is any request resolved without invoking a fill of its own,
/// including requests coalesced onto another caller's in-flight fill; a miss
/// is a key this caller had to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

/// Shared TTL cache keyed by `K`.
///
/// The internal mutex guards only structural map mutation; fills run outside
/// the lock, so distinct keys proceed independently.
pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

enum Plan<V> {
    Hit(V),
    Wait(watch::Receiver<FillSignal<V>>),
    Fill(watch::Sender<FillSignal<V>>),
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Returns a live value for `key`, invoking `fill` at most once per
    /// concurrently-requested key.
    ///
    /// A failed fill removes the placeholder so a later call retries; every
    /// caller coalesced onto that fill observes the same error.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fill: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, FetchError>>,
    {
        let mut fill = Some(fill);
        loop {
            let plan = self.plan_for(&key).await;

            match plan {
                Plan::Hit(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Plan::Wait(rx) => match Self::await_pending(rx).await {
                    Some(result) => {
                        if result.is_ok() {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                        }
                        return result;
                    }
                    // The filler vanished without resolving (its task was
                    // dropped). Clear the stale placeholder and retry.
                    None => {
                        self.clear_stale_pending(&key).await;
                        continue;
                    }
                },
                Plan::Fill(tx) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let fill = fill.take().expect("fill claimed at most once");
                    let result = fill().await;
                    self.resolve(&key, &result).await;
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Batch variant: one collapsed fill call covers every key this caller
    /// claims; keys already pending elsewhere are awaited, not refetched.
    ///
    /// `fill_many` receives only the claimed keys and may return a partial
    /// map; claimed keys absent from it resolve as protocol failures, so the
    /// output always carries one entry per input key.
    pub async fn get_or_fetch_batch<F, Fut>(
        &self,
        keys: &[K],
        fill_many: F,
    ) -> Vec<(K, Result<V, FetchError>)>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: std::future::Future<Output = Result<HashMap<K, V>, FetchError>>,
    {
        let mut resolved: HashMap<K, Result<V, FetchError>> = HashMap::with_capacity(keys.len());
        let mut waits: Vec<(K, watch::Receiver<FillSignal<V>>)> = Vec::new();
        let mut claimed: Vec<(K, watch::Sender<FillSignal<V>>)> = Vec::new();

        {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            for key in keys {
                if resolved.contains_key(key)
                    || waits.iter().any(|(k, _)| k == key)
                    || claimed.iter().any(|(k, _)| k == key)
                {
                    continue;
                }
                match slots.get(key) {
                    Some(Slot::Ready { value, expires_at }) if now < *expires_at => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        resolved.insert(key.clone(), Ok(value.clone()));
                    }
                    Some(Slot::Pending(rx)) => {
                        waits.push((key.clone(), rx.clone()));
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.clone(), Slot::Pending(rx));
                        claimed.push((key.clone(), tx));
                    }
                }
            }
        }

        if !claimed.is_empty() {
            self.misses
                .fetch_add(claimed.len() as u64, Ordering::Relaxed);
            let claimed_keys: Vec<K> = claimed.iter().map(|(k, _)| k.clone()).collect();
            let outcome = fill_many(claimed_keys).await;

            match outcome {
                Ok(mut filled) => {
                    for (key, tx) in claimed {
                        let result = match filled.remove(&key) {
                            Some(value) => Ok(value),
                            None => Err(FetchError::protocol(
                                "symbol absent from upstream response",
                            )),
                        };
                        self.resolve(&key, &result).await;
                        let _ = tx.send(Some(result.clone()));
                        resolved.insert(key, result);
                    }
                }
                Err(error) => {
                    for (key, tx) in claimed {
                        let result = Err(error.clone());
                        self.resolve(&key, &result).await;
                        let _ = tx.send(Some(result.clone()));
                        resolved.insert(key, result);
                    }
                }
            }
        }

        for (key, rx) in waits {
            let result = match Self::await_pending(rx).await {
                Some(result) => {
                    if result.is_ok() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    }
                    result
                }
                // A vanished filler means the owning run was torn down;
                // surface it as cancellation rather than refetching here.
                None => {
                    self.clear_stale_pending(&key).await;
                    Err(FetchError::cancelled())
                }
            };
            resolved.insert(key, result);
        }

        keys.iter()
            .map(|key| {
                let result = resolved
                    .get(key)
                    .cloned()
                    .expect("every input key was resolved");
                (key.clone(), result)
            })
            .collect()
    }

    /// Number of entries, pending placeholders included.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    async fn plan_for(&self, key: &K) -> Plan<V> {
        let mut slots = self.slots.lock().await;
        match slots.get(key) {
            Some(Slot::Ready { value, expires_at }) if Instant::now() < *expires_at => {
                Plan::Hit(value.clone())
            }
            Some(Slot::Pending(rx)) => Plan::Wait(rx.clone()),
            // Absent or expired: claim the fill.
            _ => {
                let (tx, rx) = watch::channel(None);
                slots.insert(key.clone(), Slot::Pending(rx));
                Plan::Fill(tx)
            }
        }
    }

    async fn resolve(&self, key: &K, result: &Result<V, FetchError>) {
        let mut slots = self.slots.lock().await;
        match result {
            Ok(value) => {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        value: value.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            }
            Err(_) => {
                slots.remove(key);
            }
        }
    }

    /// Awaits a pending fill's broadcast. `None` means the filler dropped
    /// its sender without ever resolving.
    async fn await_pending(mut rx: watch::Receiver<FillSignal<V>>) -> Option<Result<V, FetchError>> {
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return Some(result);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    async fn clear_stale_pending(&self, key: &K) {
        let mut slots = self.slots.lock().await;
        if let Some(Slot::Pending(rx)) = slots.get(key) {
            if rx.borrow().is_none() && rx.has_changed().is_err() {
                slots.remove(key);
            }
        }
    }
}
