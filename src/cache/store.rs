//! Session-lifetime query store.
//!
//! Maps [`QueryKey`]s to entries holding the last known server result, its
//! status and staleness. Reads never block on the network: callers get the
//! current snapshot and, when the entry is stale, a background fetch is
//! started (stale-while-revalidate).
//!
//! Ordering is enforced with a per-key request generation. Every fetch that
//! hits the network takes a new generation; a response is only written back
//! when its generation is still the entry's current one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::data::CachedData;
use super::error::QueryError;
use super::fetcher::Fetcher;
use super::keys::{EntityTag, QueryKey};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_QUERY_FETCH_TOTAL: &str = "aequitas_query_fetch_total";
pub(crate) const METRIC_QUERY_DEDUP_TOTAL: &str = "aequitas_query_dedup_total";
pub(crate) const METRIC_QUERY_DISCARDED_TOTAL: &str = "aequitas_query_discarded_total";
pub(crate) const METRIC_QUERY_FETCH_MS: &str = "aequitas_query_fetch_ms";

/// Monotonic counter ordering fetches against invalidations.
pub type Epoch = u64;

pub type FetchResult = Result<CachedData, QueryError>;

/// A fetch that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// An optimistic transformation of one entry's data. Returns `None` when the
/// data is not something the patch applies to.
pub(crate) type Patch = Arc<dyn Fn(&CachedData) -> Option<CachedData> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

/// How a fetch interacts with one already in flight for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Attach to the in-flight fetch instead of issuing another.
    Dedupe,
    /// Issue a new fetch; the older one's response will be discarded.
    Supersede,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    pub key: QueryKey,
    pub data: Option<CachedData>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    pub last_fetched_at: Option<OffsetDateTime>,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub has_pending_mutation: bool,
}

pub(crate) enum Settlement {
    /// The write succeeded. The optional patch folds the server's answer
    /// into the confirmed value.
    Confirmed(Option<Patch>),
    RolledBack,
}

#[derive(Clone)]
struct Baseline {
    data: Option<CachedData>,
    status: QueryStatus,
    error: Option<QueryError>,
    last_fetched_at: Option<OffsetDateTime>,
    settled_at: Option<Instant>,
    is_stale: bool,
}

struct Layer {
    id: Uuid,
    patch: Patch,
}

/// Pending optimistic state: the confirmed base plus the predictions of
/// every mutation still in flight, in issue order.
struct Optimistic {
    base: Baseline,
    layers: Vec<Layer>,
}

struct Entry {
    data: Option<CachedData>,
    status: QueryStatus,
    error: Option<QueryError>,
    last_fetched_at: Option<OffsetDateTime>,
    settled_at: Option<Instant>,
    is_stale: bool,
    generation: u64,
    in_flight: Option<SharedFetch>,
    invalidated_epoch: Epoch,
    subscribers: usize,
    unobserved_since: Option<Instant>,
    optimistic: Option<Optimistic>,
    version: watch::Sender<u64>,
}

impl Entry {
    fn new(now: Instant) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            last_fetched_at: None,
            settled_at: None,
            is_stale: false,
            generation: 0,
            in_flight: None,
            invalidated_epoch: 0,
            subscribers: 0,
            unobserved_since: Some(now),
            optimistic: None,
            version,
        }
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn is_expired(&self, now: Instant, stale_time: Duration) -> bool {
        self.settled_at
            .is_none_or(|at| now.saturating_duration_since(at) >= stale_time)
    }

    fn reports_stale(&self, now: Instant, stale_time: Duration) -> bool {
        self.is_stale || (self.status == QueryStatus::Success && self.is_expired(now, stale_time))
    }

    /// Errors only refetch after an explicit invalidation or refetch, so a
    /// failing endpoint is not hammered on every read.
    fn needs_fetch(&self, now: Instant, stale_time: Duration) -> bool {
        if self.in_flight.is_some() || self.optimistic.is_some() {
            return false;
        }
        match self.status {
            QueryStatus::Idle => true,
            QueryStatus::Loading => false,
            QueryStatus::Success => self.is_stale || self.is_expired(now, stale_time),
            QueryStatus::Error => self.is_stale,
        }
    }

    fn is_collectable(&self, now: Instant, gc_time: Duration) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && self.optimistic.is_none()
            && self
                .unobserved_since
                .is_some_and(|since| now.saturating_duration_since(since) >= gc_time)
    }

    fn baseline(&self) -> Baseline {
        Baseline {
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            settled_at: self.settled_at,
            is_stale: self.is_stale,
        }
    }

    fn restore(&mut self, base: Baseline) {
        self.data = base.data;
        self.status = base.status;
        self.error = base.error;
        self.last_fetched_at = base.last_fetched_at;
        self.settled_at = base.settled_at;
        self.is_stale = base.is_stale;
    }

    fn snapshot(&self, key: &QueryKey, now: Instant, stale_time: Duration) -> QuerySnapshot {
        QuerySnapshot {
            key: key.clone(),
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            is_stale: self.reports_stale(now, stale_time),
            is_fetching: self.in_flight.is_some(),
            has_pending_mutation: self.optimistic.is_some(),
        }
    }
}

fn replay(base: Option<&CachedData>, layers: &[Layer]) -> Option<CachedData> {
    let mut data = base.cloned()?;
    for layer in layers {
        if let Some(next) = (layer.patch)(&data) {
            data = next;
        }
    }
    Some(data)
}

/// Keyed store of server-derived results.
///
/// All state sits behind one mutex that is never held across an `.await`.
pub struct CacheStore {
    config: CacheConfig,
    fetcher: Arc<dyn Fetcher>,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    epoch_counter: AtomicU64,
}

impl CacheStore {
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            fetcher,
            entries: Mutex::new(HashMap::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current snapshot for `key`, stale or not.
    pub fn get(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "get");
        entries
            .get(key)
            .map(|entry| entry.snapshot(key, now, self.config.stale_time()))
    }

    /// Write `data` directly, as if a fetch had just completed.
    ///
    /// Any in-flight fetch for the key is superseded. When optimistic patches
    /// are pending they are replayed on top of the new value.
    pub fn set(&self, key: &QueryKey, data: CachedData, status: QueryStatus) {
        let now = Instant::now();
        let fetched_at = OffsetDateTime::now_utc();
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));

        if entry.in_flight.take().is_some() {
            entry.generation += 1;
        }
        let error = if status == QueryStatus::Error {
            entry.error.clone()
        } else {
            None
        };

        match entry.optimistic.as_mut() {
            Some(optimistic) => {
                optimistic.base = Baseline {
                    data: Some(data),
                    status,
                    error,
                    last_fetched_at: Some(fetched_at),
                    settled_at: Some(now),
                    is_stale: false,
                };
                entry.data = replay(optimistic.base.data.as_ref(), &optimistic.layers);
            }
            None => {
                entry.data = Some(data);
                entry.status = status;
                entry.error = error;
                entry.last_fetched_at = Some(fetched_at);
                entry.settled_at = Some(now);
                entry.is_stale = false;
            }
        }
        entry.notify();
    }

    /// Flag every entry whose key matches `predicate` as stale. Data is kept.
    ///
    /// Returns the number of entries marked.
    pub fn mark_stale<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let epoch = self.next_epoch();
        let mut entries = mutex_lock(&self.entries, SOURCE, "mark_stale");
        let mut marked = 0;
        for (key, entry) in entries.iter_mut() {
            if !predicate(key) {
                continue;
            }
            entry.is_stale = true;
            entry.invalidated_epoch = epoch;
            if let Some(optimistic) = entry.optimistic.as_mut() {
                optimistic.base.is_stale = true;
            }
            entry.notify();
            marked += 1;
        }
        marked
    }

    /// Register interest in `key`, creating an idle entry when absent.
    pub fn subscribe(self: &Arc<Self>, key: &QueryKey) -> Subscription {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "subscribe");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));
        entry.subscribers += 1;
        entry.unobserved_since = None;
        let receiver = entry.version.subscribe();

        Subscription {
            store: Arc::clone(self),
            key: key.clone(),
            receiver,
        }
    }

    fn release(&self, key: &QueryKey) {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "release");
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.unobserved_since = Some(now);
            }
        }
    }

    /// Start (or join) a fetch for `key`.
    ///
    /// The returned future resolves with the fetch result; dropping it does
    /// not cancel the fetch, which is driven on the current Tokio runtime.
    /// Called outside a runtime, the fetch only runs when the returned future
    /// is awaited, so the entry is not marked as fetching and other callers
    /// cannot join it.
    /// While an optimistic patch is pending nothing is sent and the current
    /// value is returned.
    pub fn fetch(self: &Arc<Self>, key: &QueryKey, mode: FetchMode) -> SharedFetch {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "fetch");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));

        if let Some(optimistic) = entry.optimistic.as_mut() {
            optimistic.base.is_stale = true;
            entry.is_stale = true;
            debug!(key = %key, "Fetch deferred while an optimistic patch is pending");
            let current = entry
                .data
                .clone()
                .ok_or_else(|| QueryError::decode("no data while an optimistic patch is pending"));
            return future::ready(current).boxed().shared();
        }

        if mode == FetchMode::Dedupe {
            if let Some(in_flight) = entry.in_flight.as_ref() {
                counter!(METRIC_QUERY_DEDUP_TOTAL, "tag" => key.tag().as_str()).increment(1);
                debug!(key = %key, generation = entry.generation, "Joined in-flight fetch");
                return in_flight.clone();
            }
        }

        entry.generation += 1;
        let generation = entry.generation;
        let issued_epoch = self.next_epoch();
        let store = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);
        let fetch_key = key.clone();

        let shared = async move {
            let started = std::time::Instant::now();
            let result = fetcher.read(&fetch_key).await;
            histogram!(METRIC_QUERY_FETCH_MS, "tag" => fetch_key.tag().as_str())
                .record(started.elapsed().as_secs_f64() * 1000.0);
            if let Some(store) = store.upgrade() {
                store.complete_fetch(&fetch_key, generation, issued_epoch, &result);
            }
            result
        }
        .boxed()
        .shared();

        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_some() {
            entry.in_flight = Some(shared.clone());
            if entry.data.is_none() {
                entry.status = QueryStatus::Loading;
            }
            entry.notify();
        }
        drop(entries);

        counter!(METRIC_QUERY_FETCH_TOTAL, "tag" => key.tag().as_str()).increment(1);
        debug!(
            key = %key,
            fingerprint = key.fingerprint(),
            generation,
            mode = ?mode,
            background = runtime.is_some(),
            "Query fetch issued"
        );

        if let Some(handle) = runtime {
            handle.spawn(shared.clone());
        }
        shared
    }

    /// Start a background fetch when `key` is absent, stale or expired.
    pub fn ensure_fresh(self: &Arc<Self>, key: &QueryKey) -> Option<SharedFetch> {
        let now = Instant::now();
        let needs_fetch = {
            let entries = mutex_lock(&self.entries, SOURCE, "ensure_fresh");
            entries
                .get(key)
                .is_none_or(|entry| entry.needs_fetch(now, self.config.stale_time()))
        };
        needs_fetch.then(|| self.fetch(key, FetchMode::Dedupe))
    }

    fn complete_fetch(&self, key: &QueryKey, generation: u64, issued_epoch: Epoch, result: &FetchResult) {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "complete_fetch");
        let Some(entry) = entries.get_mut(key) else {
            debug!(key = %key, "Fetch completed for a collected entry");
            return;
        };

        if entry.generation != generation || entry.optimistic.is_some() {
            counter!(METRIC_QUERY_DISCARDED_TOTAL, "tag" => key.tag().as_str()).increment(1);
            debug!(
                key = %key,
                fingerprint = key.fingerprint(),
                generation,
                current_generation = entry.generation,
                "Discarded superseded query response"
            );
            return;
        }

        entry.in_flight = None;
        entry.settled_at = Some(now);
        entry.is_stale = entry.invalidated_epoch > issued_epoch;
        match result {
            Ok(data) => {
                entry.data = Some(data.clone());
                entry.status = QueryStatus::Success;
                entry.error = None;
                entry.last_fetched_at = Some(OffsetDateTime::now_utc());
            }
            Err(err) => {
                warn!(
                    key = %key,
                    error_kind = err.kind(),
                    error = %err,
                    kept_data = entry.data.is_some(),
                    "Query fetch failed"
                );
                entry.status = QueryStatus::Error;
                entry.error = Some(err.clone());
            }
        }
        entry.notify();
    }

    /// Logically drop the in-flight fetch for `key`; its response will be
    /// ignored. Returns whether anything was in flight.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        let mut entries = mutex_lock(&self.entries, SOURCE, "cancel");
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.in_flight.take().is_none() {
            return false;
        }
        entry.generation += 1;
        if entry.status == QueryStatus::Loading {
            entry.status = if entry.data.is_some() {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            };
        }
        debug!(key = %key, generation = entry.generation, "Query fetch cancelled");
        entry.notify();
        true
    }

    /// Every cached key under `tag`, in key order.
    pub fn keys_for(&self, tag: EntityTag) -> Vec<QueryKey> {
        let entries = mutex_lock(&self.entries, SOURCE, "keys_for");
        let mut keys: Vec<QueryKey> = entries
            .keys()
            .filter(|key| key.tag() == tag)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Remove entries nobody has observed for longer than `gc_time`.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let gc_time = self.config.gc_time();
        let mut entries = mutex_lock(&self.entries, SOURCE, "collect_garbage");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_collectable(now, gc_time));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Collected unobserved query entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an optimistic patch on top of `key`'s current data.
    ///
    /// Cancels any in-flight fetch first. Returns false (and changes
    /// nothing) when the entry has no data or the patch does not apply.
    pub(crate) fn apply_optimistic(&self, key: &QueryKey, id: Uuid, patch: Patch) -> bool {
        let mut entries = mutex_lock(&self.entries, SOURCE, "apply_optimistic");
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let Some(next) = entry.data.as_ref().and_then(|current| patch(current)) else {
            return false;
        };

        if entry.in_flight.take().is_some() {
            entry.generation += 1;
            debug!(key = %key, mutation_id = %id, "Cancelled in-flight fetch for optimistic patch");
        }
        if entry.optimistic.is_none() {
            let base = entry.baseline();
            entry.optimistic = Some(Optimistic {
                base,
                layers: Vec::new(),
            });
        }
        if let Some(optimistic) = entry.optimistic.as_mut() {
            optimistic.layers.push(Layer { id, patch });
        }
        entry.data = Some(next);
        entry.status = QueryStatus::Success;
        entry.error = None;
        entry.notify();
        true
    }

    /// Remove mutation `id`'s layer from `key`.
    ///
    /// On confirmation the layer is folded into the base; on rollback it is
    /// dropped. The remaining layers are replayed over the base, and once no
    /// layer remains the entry returns to exactly the base state.
    pub(crate) fn settle_optimistic(&self, key: &QueryKey, id: Uuid, settlement: Settlement) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "settle_optimistic");
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        let Some(mut optimistic) = entry.optimistic.take() else {
            return;
        };
        let Some(position) = optimistic.layers.iter().position(|layer| layer.id == id) else {
            entry.optimistic = Some(optimistic);
            return;
        };
        let layer = optimistic.layers.remove(position);

        if let Settlement::Confirmed(reconcile) = settlement {
            if let Some(base_data) = optimistic.base.data.take() {
                let confirmed = (layer.patch)(&base_data).unwrap_or(base_data);
                let confirmed = match reconcile {
                    Some(reconcile) => reconcile(&confirmed).unwrap_or(confirmed),
                    None => confirmed,
                };
                optimistic.base.data = Some(confirmed);
            }
            optimistic.base.status = QueryStatus::Success;
            optimistic.base.error = None;
        }

        if optimistic.layers.is_empty() {
            entry.restore(optimistic.base);
        } else {
            entry.data = replay(optimistic.base.data.as_ref(), &optimistic.layers);
            entry.optimistic = Some(optimistic);
        }
        entry.notify();
    }
}

/// Keeps an entry alive and delivers its change notifications.
pub struct Subscription {
    store: Arc<CacheStore>,
    key: QueryKey,
    receiver: watch::Receiver<u64>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Wait for the next state change. Returns false if the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    pub fn mark_seen(&mut self) {
        self.receiver.borrow_and_update();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}
