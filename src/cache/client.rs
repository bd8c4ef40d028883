//! Query client: the entry points UI code uses.
//!
//! `use_entity_query` hands out observers over one key; `use_entity_mutation`
//! wraps a [`MutationSpec`] in a handle. Nothing else reaches into the store.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::OnceCell;
use time::OffsetDateTime;
use tracing::info;

use super::config::CacheConfig;
use super::data::{CachedData, Cacheable};
use super::error::QueryError;
use super::fetcher::Fetcher;
use super::invalidation::InvalidationRouter;
use super::keys::QueryKey;
use super::mutation::{MutationEngine, MutationSpec};
use super::store::{CacheStore, FetchMode, QuerySnapshot, QueryStatus, Subscription};

static GLOBAL: OnceCell<QueryClient> = OnceCell::new();

/// Owns the store, the fetcher, the mutation engine and the router.
pub struct QueryClient {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    engine: Arc<MutationEngine>,
}

impl QueryClient {
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let store = Arc::new(CacheStore::new(config, Arc::clone(&fetcher)));
        let router = InvalidationRouter::new(Arc::clone(&store));
        let engine = Arc::new(MutationEngine::new(Arc::clone(&store), router));
        Self {
            store,
            fetcher,
            engine,
        }
    }

    /// Install the process-wide client. Fails (returning the client) when
    /// one is already installed.
    pub fn install(client: QueryClient) -> Result<&'static QueryClient, QueryClient> {
        let installed = GLOBAL.try_insert(client).map_err(|(_, rejected)| rejected)?;
        info!("Query client installed");
        Ok(installed)
    }

    pub fn global() -> Option<&'static QueryClient> {
        GLOBAL.get()
    }

    pub fn config(&self) -> &CacheConfig {
        self.store.config()
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        Arc::clone(&self.fetcher)
    }

    /// Observe the cached result for `key`.
    pub fn use_entity_query<T: Cacheable>(&self, key: QueryKey) -> QueryObserver<T> {
        let subscription = self.store.subscribe(&key);
        QueryObserver {
            store: Arc::clone(&self.store),
            key,
            subscription,
            _marker: PhantomData,
        }
    }

    pub fn use_entity_mutation<V, T, R>(&self, spec: MutationSpec<V, T, R>) -> MutationHandle<V, T, R>
    where
        V: Clone + Send + Sync + 'static,
        T: Cacheable,
        R: Clone + Send + Sync + 'static,
    {
        MutationHandle {
            engine: Arc::clone(&self.engine),
            spec: Arc::new(spec),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Drop entries that have gone unobserved for longer than `gc_time`.
    pub fn collect_garbage(&self) -> usize {
        self.store.collect_garbage()
    }
}

/// What an observer sees for its key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    /// First load: fetching with nothing to show yet.
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub last_fetched_at: Option<OffsetDateTime>,
}

impl<T: Cacheable> QueryState<T> {
    fn from_snapshot(snapshot: Option<QuerySnapshot>) -> Self {
        match snapshot {
            Some(snapshot) => {
                let data = snapshot.data.as_ref().and_then(T::from_cached);
                Self {
                    is_loading: snapshot.is_fetching && data.is_none(),
                    data,
                    status: snapshot.status,
                    error: snapshot.error,
                    is_fetching: snapshot.is_fetching,
                    is_stale: snapshot.is_stale,
                    last_fetched_at: snapshot.last_fetched_at,
                }
            }
            None => Self {
                data: None,
                status: QueryStatus::Idle,
                error: None,
                is_loading: false,
                is_fetching: false,
                is_stale: true,
                last_fetched_at: None,
            },
        }
    }
}

fn typed<T: Cacheable>(data: &CachedData) -> Result<T, QueryError> {
    T::from_cached(data).ok_or_else(|| {
        QueryError::decode(format!("cached {} data has an unexpected shape", data.tag()))
    })
}

/// A live view over one query key.
///
/// Holding an observer keeps the entry from being collected.
pub struct QueryObserver<T> {
    store: Arc<CacheStore>,
    key: QueryKey,
    subscription: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Cacheable> QueryObserver<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current state. Starts a background fetch when the entry is missing,
    /// stale or expired; the returned state already reflects it.
    ///
    /// The background fetch needs a Tokio runtime. Outside one nothing is
    /// started and the entry is left as it was; use [`Self::resolve`].
    pub fn state(&self) -> QueryState<T> {
        // Dropping the handle is fine: the fetch keeps running.
        let _ = self.store.ensure_fresh(&self.key);
        self.peek()
    }

    /// Current state without triggering a fetch.
    pub fn peek(&self) -> QueryState<T> {
        QueryState::from_snapshot(self.store.get(&self.key))
    }

    /// Wait until the entry changes. Returns false once the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.subscription.changed().await
    }

    /// Fresh data: returns the cached value when it is fresh, otherwise
    /// waits for the (possibly shared) fetch.
    pub async fn resolve(&self) -> Result<T, QueryError> {
        let fetch = match self.store.ensure_fresh(&self.key) {
            Some(fetch) => Some(fetch),
            None if self.store.get(&self.key).is_some_and(|snapshot| snapshot.is_fetching) => {
                Some(self.store.fetch(&self.key, FetchMode::Dedupe))
            }
            None => None,
        };
        if let Some(fetch) = fetch {
            return fetch.await.and_then(|data| typed(&data));
        }

        match self.store.get(&self.key) {
            Some(QuerySnapshot {
                data: Some(data), ..
            }) => typed(&data),
            Some(QuerySnapshot {
                error: Some(error), ..
            }) => Err(error),
            _ => Err(QueryError::decode(format!("no data cached for {}", self.key))),
        }
    }

    /// Force a new fetch, superseding any in flight.
    pub async fn refetch(&self) -> Result<T, QueryError> {
        self.store
            .fetch(&self.key, FetchMode::Supersede)
            .await
            .and_then(|data| typed(&data))
    }
}

/// A reusable trigger for one kind of mutation.
pub struct MutationHandle<V, T, R> {
    engine: Arc<MutationEngine>,
    spec: Arc<MutationSpec<V, T, R>>,
    pending: Arc<AtomicUsize>,
}

impl<V, T, R> Clone for MutationHandle<V, T, R> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            spec: Arc::clone(&self.spec),
            pending: Arc::clone(&self.pending),
        }
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<V, T, R> MutationHandle<V, T, R>
where
    V: Clone + Send + Sync + 'static,
    T: Cacheable,
    R: Clone + Send + Sync + 'static,
{
    /// Issue the mutation. Optimistic patches and [`Self::is_pending`] are
    /// in effect once this returns; the returned future sends the write and
    /// settles it.
    pub fn mutate(&self, vars: V) -> BoxFuture<'static, Result<R, QueryError>> {
        let pending = PendingGuard::enter(&self.pending);
        let write = self.engine.mutate(&self.spec, vars);
        async move {
            let _pending = pending;
            write.await
        }
        .boxed()
    }

    /// Whether any mutation issued through this handle (or its clones) is
    /// still waiting for the server.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    pub fn name(&self) -> &'static str {
        self.spec.name()
    }
}
