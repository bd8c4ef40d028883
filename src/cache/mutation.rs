//! Optimistic mutations.
//!
//! A mutation patches every target entry synchronously before its write is
//! sent, so observers see the predicted state at once. On failure each patch
//! is rolled back; on success the related entity tags are invalidated so the
//! next read converges on the server's state.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use super::data::Cacheable;
use super::error::QueryError;
use super::fetcher::{Fetcher, WriteOp, WriteResult};
use super::invalidation::{InvalidationRouter, WriteKind};
use super::keys::{EntityTag, QueryKey};
use super::store::{CacheStore, Patch, Settlement};

pub(crate) const METRIC_MUTATION_TOTAL: &str = "aequitas_mutation_total";

type Perform<V, R> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync>;
type Predict<V, T> = Arc<dyn Fn(&V, &T) -> T + Send + Sync>;
type Reconcile<V, T, R> = Arc<dyn Fn(&V, &T, &R) -> T + Send + Sync>;
type Invalidates<V> = Arc<dyn Fn(&V) -> &'static [EntityTag] + Send + Sync>;

/// Declarative description of one kind of write.
///
/// `T` is the typed view of the target entries, `V` the caller's variables
/// and `R` what the write returns.
pub struct MutationSpec<V, T, R> {
    name: &'static str,
    target_keys: Vec<QueryKey>,
    target_tags: Vec<EntityTag>,
    perform: Perform<V, R>,
    predict: Option<Predict<V, T>>,
    reconcile: Option<Reconcile<V, T, R>>,
    invalidate: Invalidates<V>,
}

impl<V, T, R> MutationSpec<V, T, R>
where
    V: Clone + Send + Sync + 'static,
    T: Cacheable,
    R: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, perform: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
    {
        Self {
            name,
            target_keys: Vec::new(),
            target_tags: Vec::new(),
            perform: Arc::new(move |vars| perform(vars).boxed()),
            predict: None,
            reconcile: None,
            invalidate: Arc::new(|_: &V| -> &'static [EntityTag] { &[] }),
        }
    }

    /// Patch this exact key.
    pub fn target(mut self, key: QueryKey) -> Self {
        self.target_keys.push(key);
        self
    }

    /// Patch every key cached under `tag` when the mutation is issued.
    pub fn target_tag(mut self, tag: EntityTag) -> Self {
        self.target_tags.push(tag);
        self
    }

    pub fn predict<F>(mut self, predict: F) -> Self
    where
        F: Fn(&V, &T) -> T + Send + Sync + 'static,
    {
        self.predict = Some(Arc::new(predict));
        self
    }

    /// Fold the server's answer into the confirmed value.
    pub fn reconcile<F>(mut self, reconcile: F) -> Self
    where
        F: Fn(&V, &T, &R) -> T + Send + Sync + 'static,
    {
        self.reconcile = Some(Arc::new(reconcile));
        self
    }

    /// Invalidate `tags` after every successful write.
    pub fn invalidate(mut self, tags: &'static [EntityTag]) -> Self {
        self.invalidate = Arc::new(move |_: &V| tags);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tags a successful write with `vars` invalidates.
    pub fn invalidates(&self, vars: &V) -> &'static [EntityTag] {
        (self.invalidate)(vars)
    }

    fn prediction_patch(&self, vars: &V) -> Option<Patch> {
        let predict = Arc::clone(self.predict.as_ref()?);
        let vars = vars.clone();
        Some(Arc::new(move |data| {
            T::from_cached(data).map(|current| predict(&vars, &current).into_cached())
        }))
    }

}

impl<V, T> MutationSpec<V, T, WriteResult>
where
    V: Clone + Send + Sync + 'static,
    T: Cacheable,
{
    /// A mutation that sends one [`WriteOp`] built from its variables. What
    /// it invalidates follows from the operation's [`WriteKind`].
    pub fn write<F>(name: &'static str, fetcher: Arc<dyn Fetcher>, to_op: F) -> Self
    where
        F: Fn(V) -> WriteOp + Send + Sync + 'static,
    {
        let to_op = Arc::new(to_op);
        let routed = Arc::clone(&to_op);
        let mut spec = Self::new(name, move |vars: V| {
            let fetcher = Arc::clone(&fetcher);
            let op = to_op(vars);
            async move { fetcher.write(op).await }
        });
        spec.invalidate = Arc::new(move |vars: &V| WriteKind::of(&routed(vars.clone())).plan());
        spec
    }
}

fn reconcile_patch<V, T, R>(reconcile: Reconcile<V, T, R>, vars: &V, result: &R) -> Patch
where
    V: Clone + Send + Sync + 'static,
    T: Cacheable,
    R: Clone + Send + Sync + 'static,
{
    let vars = vars.clone();
    let result = result.clone();
    Arc::new(move |data| {
        T::from_cached(data).map(|current| reconcile(&vars, &current, &result).into_cached())
    })
}

/// Optimistic patches that are still waiting for their write to settle.
///
/// Dropping it unsettled (the mutation future was abandoned) rolls back.
struct PendingMutation {
    id: Uuid,
    store: Arc<CacheStore>,
    keys: Vec<QueryKey>,
    settled: bool,
}

impl PendingMutation {
    fn settle(mut self, reconcile: Option<Patch>) {
        for key in &self.keys {
            self.store
                .settle_optimistic(key, self.id, Settlement::Confirmed(reconcile.clone()));
        }
        self.settled = true;
    }

    fn roll_back(mut self) {
        self.rollback_all();
        self.settled = true;
    }

    fn rollback_all(&self) {
        for key in &self.keys {
            self.store
                .settle_optimistic(key, self.id, Settlement::RolledBack);
        }
    }
}

impl Drop for PendingMutation {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                mutation_id = %self.id,
                patched = self.keys.len(),
                "Mutation abandoned before settling; rolling back"
            );
            self.rollback_all();
        }
    }
}

/// Runs [`MutationSpec`]s against the store.
pub struct MutationEngine {
    store: Arc<CacheStore>,
    router: InvalidationRouter,
}

impl MutationEngine {
    pub fn new(store: Arc<CacheStore>, router: InvalidationRouter) -> Self {
        Self { store, router }
    }

    fn resolve_targets<V, T, R>(&self, spec: &MutationSpec<V, T, R>) -> Vec<QueryKey> {
        let mut keys = spec.target_keys.clone();
        for tag in &spec.target_tags {
            for key in self.store.keys_for(*tag) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Patch every target now, then return the write.
    ///
    /// The predicted values are visible as soon as this returns, before the
    /// returned future is first polled. Dropping the future unpolled rolls
    /// the patches back.
    pub fn mutate<V, T, R>(
        &self,
        spec: &MutationSpec<V, T, R>,
        vars: V,
    ) -> BoxFuture<'static, Result<R, QueryError>>
    where
        V: Clone + Send + Sync + 'static,
        T: Cacheable,
        R: Clone + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let targets = self.resolve_targets(spec);

        let mut patched = Vec::new();
        match spec.prediction_patch(&vars) {
            Some(patch) => {
                for key in targets {
                    if self.store.apply_optimistic(&key, id, Arc::clone(&patch)) {
                        patched.push(key);
                    } else {
                        self.store.cancel(&key);
                    }
                }
            }
            None => {
                for key in &targets {
                    self.store.cancel(key);
                }
            }
        }
        info!(
            mutation = spec.name,
            mutation_id = %id,
            patched = patched.len(),
            "Mutation issued"
        );

        let pending = PendingMutation {
            id,
            store: Arc::clone(&self.store),
            keys: patched,
            settled: false,
        };
        let write = (spec.perform)(vars.clone());
        let reconcile = spec.reconcile.clone();
        let invalidate = spec.invalidates(&vars);
        let router = self.router.clone();
        let name = spec.name;

        async move {
            match write.await {
                Ok(result) => {
                    pending.settle(reconcile.map(|reconcile| reconcile_patch(reconcile, &vars, &result)));
                    let marked = router.invalidate(invalidate);
                    counter!(METRIC_MUTATION_TOTAL, "outcome" => "success").increment(1);
                    info!(
                        mutation = name,
                        mutation_id = %id,
                        invalidated = marked,
                        "Mutation settled"
                    );
                    Ok(result)
                }
                Err(err) => {
                    pending.roll_back();
                    counter!(METRIC_MUTATION_TOTAL, "outcome" => "rolled_back").increment(1);
                    warn!(
                        mutation = name,
                        mutation_id = %id,
                        error_kind = err.kind(),
                        error = %err,
                        "Mutation failed; optimistic patches rolled back"
                    );
                    Err(err)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use aequitas_api_types::{Money, Pot};

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::data::CachedData;
    use crate::cache::store::QueryStatus;
    use crate::cache::testing::{StubFetcher, pot, pots_fixture};

    fn engine() -> (Arc<CacheStore>, MutationEngine) {
        let fetcher = Arc::new(StubFetcher::with_pots(pots_fixture()));
        let store = Arc::new(CacheStore::new(CacheConfig::default(), fetcher));
        let router = InvalidationRouter::new(Arc::clone(&store));
        (Arc::clone(&store), MutationEngine::new(store, router))
    }

    fn pots_key() -> QueryKey {
        QueryKey::bare(EntityTag::Pots)
    }

    fn contribution_spec(
        outcome: Result<Pot, QueryError>,
    ) -> MutationSpec<(String, i64), Vec<Pot>, Pot> {
        MutationSpec::new("test.contribute", move |_vars: (String, i64)| {
            let outcome = outcome.clone();
            async move { outcome }
        })
        .target(pots_key())
        .predict(|(id, amount): &(String, i64), pots: &Vec<Pot>| {
            pots.iter()
                .map(|pot| {
                    if &pot.id == id {
                        pot.with_contribution(Money::from_units(*amount))
                    } else {
                        pot.clone()
                    }
                })
                .collect()
        })
        .reconcile(|_, pots: &Vec<Pot>, confirmed: &Pot| {
            pots.iter()
                .map(|pot| {
                    if pot.id == confirmed.id {
                        confirmed.clone()
                    } else {
                        pot.clone()
                    }
                })
                .collect()
        })
        .invalidate(crate::cache::invalidation::POT_WRITE)
    }

    fn cached_pots(store: &CacheStore) -> Vec<Pot> {
        match store.get(&pots_key()).and_then(|snapshot| snapshot.data) {
            Some(CachedData::Pots(pots)) => pots,
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_reconciles_and_invalidates() {
        let (store, engine) = engine();
        store.set(&pots_key(), CachedData::Pots(pots_fixture()), QueryStatus::Success);
        let confirmed = pot("pot-1", "Vacation Fund", 1000, 1000);

        let result = engine
            .mutate(&contribution_spec(Ok(confirmed.clone())), ("pot-1".to_string(), 200))
            .await;

        assert_eq!(result, Ok(confirmed.clone()));
        assert_eq!(cached_pots(&store)[0], confirmed);
        let snapshot = store.get(&pots_key()).unwrap();
        assert!(snapshot.is_stale);
        assert!(!snapshot.has_pending_mutation);
    }

    #[tokio::test]
    async fn prediction_is_visible_before_the_write_is_polled() {
        let (store, engine) = engine();
        store.set(&pots_key(), CachedData::Pots(pots_fixture()), QueryStatus::Success);

        let write = engine.mutate(
            &contribution_spec(Ok(pot("pot-1", "Vacation Fund", 950, 1000))),
            ("pot-1".to_string(), 150),
        );

        assert_eq!(cached_pots(&store)[0].current_amount, Money::from_units(950));
        write.await.unwrap();
    }

    #[test]
    fn write_specs_invalidate_by_operation() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(StubFetcher::default());
        let spec: MutationSpec<String, Vec<Pot>, WriteResult> =
            MutationSpec::write("test.delete", fetcher, |id| WriteOp::DeletePot { id });
        assert_eq!(
            spec.invalidates(&"pot-1".to_string()),
            crate::cache::invalidation::POT_WRITE
        );
    }

    #[tokio::test]
    async fn failure_restores_the_snapshot() {
        let (store, engine) = engine();
        store.set(&pots_key(), CachedData::Pots(pots_fixture()), QueryStatus::Success);
        let before = store.get(&pots_key()).unwrap();

        let result = engine
            .mutate(
                &contribution_spec(Err(QueryError::network("connection reset"))),
                ("pot-1".to_string(), 150),
            )
            .await;

        assert_eq!(result, Err(QueryError::network("connection reset")));
        assert_eq!(store.get(&pots_key()).unwrap(), before);
    }

    #[tokio::test]
    async fn unloaded_target_is_left_alone() {
        let (store, engine) = engine();
        let result = engine
            .mutate(
                &contribution_spec(Ok(pot("pot-1", "Vacation Fund", 950, 1000))),
                ("pot-1".to_string(), 150),
            )
            .await;

        assert!(result.is_ok());
        assert!(store.get(&pots_key()).is_none());
    }

    #[tokio::test]
    async fn abandoned_mutation_rolls_back() {
        let (store, engine) = engine();
        store.set(&pots_key(), CachedData::Pots(pots_fixture()), QueryStatus::Success);
        let before = store.get(&pots_key()).unwrap();

        let spec: MutationSpec<(String, i64), Vec<Pot>, Pot> =
            MutationSpec::new("test.hang", |_vars: (String, i64)| {
                futures::future::pending::<Result<Pot, QueryError>>()
            })
            .target(pots_key())
            .predict(|_, pots: &Vec<Pot>| pots.iter().map(|pot| pot.with_contribution(Money::from_units(1))).collect());

        {
            let mut mutation = engine.mutate(&spec, ("pot-1".to_string(), 1));
            assert!(store.get(&pots_key()).unwrap().has_pending_mutation);
            assert!(futures::poll!(mutation.as_mut()).is_pending());
        }

        assert_eq!(store.get(&pots_key()).unwrap(), before);
    }
}
