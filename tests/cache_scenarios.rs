//! End-to-end behaviour of the query cache against controllable fetchers.

mod support;

use std::sync::Arc;

use aequitas::cache::{
    CacheConfig, CacheStore, CachedData, EntityTag, FetchMode, Fetcher, InvalidationRouter,
    QueryClient, QueryError, QueryKey, QueryStatus, WriteOp, WriteResult,
};
use aequitas::hooks::{self, Contribution};
use aequitas::params::ExpenseQueryParams;
use aequitas_api_types::{Money, Percent, PotUpdate};

use support::{
    Gate, GatedFetcher, MemoryApi, PendingRead, analysis, expense, find_pot, pot, summary,
    vacation_and_emergency,
};

fn gated_client() -> (QueryClient, Gate) {
    let (fetcher, gate) = GatedFetcher::new();
    (QueryClient::new(CacheConfig::default(), Arc::new(fetcher)), gate)
}

/// Answer a read the way the dashboard API would.
fn answer(read: PendingRead) {
    let data = match read.key.tag() {
        EntityTag::Pots => CachedData::Pots(vacation_and_emergency()),
        EntityTag::Expenses => CachedData::Expenses(vec![expense("exp-1", "Coffee", 4, "Food")]),
        EntityTag::ExpensesSummary => CachedData::Summary(summary(4, 1)),
        EntityTag::AiAnalysis => CachedData::Analysis(analysis("Spending is steady.")),
        EntityTag::Categories => CachedData::Categories(Vec::new()),
    };
    read.respond(Ok(data));
}

async fn answer_reads(gate: &mut Gate, count: usize) {
    for _ in 0..count {
        answer(gate.next_read().await);
    }
}

#[tokio::test]
async fn failed_contribution_restores_the_exact_prior_state() {
    let (client, mut gate) = gated_client();
    let pots = hooks::use_pots(&client);
    let (loaded, ()) = tokio::join!(pots.resolve(), answer_reads(&mut gate, 1));
    let loaded = loaded.expect("pots load");
    let before = pots.peek();

    let add = hooks::add_to_pot(&client);
    let contribution =
        Contribution::validate(&loaded, "pot-1", Money::from_units(150)).expect("valid amount");

    let (outcome, ()) = tokio::join!(add.mutate(contribution), async {
        let write = gate.next_write().await;

        let optimistic = pots.peek().data.expect("optimistic pots");
        let vacation = find_pot(&optimistic, "pot-1");
        assert_eq!(vacation.current_amount, Money::from_units(950));
        assert_eq!(vacation.progress_percentage, Percent::from_hundredths(9_500));
        assert!(add.is_pending());

        write.respond(Err(QueryError::network("request timed out")));
    });

    assert_eq!(outcome, Err(QueryError::network("request timed out")));
    assert!(!add.is_pending());

    let after = pots.peek();
    assert_eq!(after, before);
    let vacation = find_pot(after.data.as_deref().expect("pots"), "pot-1");
    assert_eq!(vacation.current_amount, Money::from_units(800));
    assert_eq!(vacation.progress_percentage, Percent::from_hundredths(8_000));
    assert!(gate.try_next_read().is_none(), "rollback must not refetch");
}

#[tokio::test]
async fn contribution_is_visible_as_soon_as_it_is_issued() {
    let (client, mut gate) = gated_client();
    let pots = hooks::use_pots(&client);
    let (loaded, ()) = tokio::join!(pots.resolve(), answer_reads(&mut gate, 1));
    let loaded = loaded.expect("pots load");

    let add = hooks::add_to_pot(&client);
    let contribution =
        Contribution::validate(&loaded, "pot-1", Money::from_units(150)).expect("valid amount");
    let write = add.mutate(contribution);

    let vacation = find_pot(pots.peek().data.as_deref().expect("pots"), "pot-1").clone();
    assert_eq!(vacation.current_amount, Money::from_units(950));
    assert!(add.is_pending());

    let (outcome, ()) = tokio::join!(write, async {
        gate.next_write()
            .await
            .respond(Ok(WriteResult::Pot(pot("pot-1", "Vacation Fund", 950, 1000))));
    });
    outcome.expect("contribution succeeds");
    assert!(!add.is_pending());
}

#[tokio::test]
async fn read_issued_before_a_mutation_cannot_undo_its_patch() {
    let (client, mut gate) = gated_client();
    let pots = hooks::use_pots(&client);
    let (loaded, ()) = tokio::join!(pots.resolve(), answer_reads(&mut gate, 1));
    let loaded = loaded.expect("pots load");

    let refetch = pots.refetch();
    tokio::pin!(refetch);
    assert!(futures::poll!(refetch.as_mut()).is_pending());
    let parked = gate.next_read().await;

    let add = hooks::add_to_pot(&client);
    let contribution =
        Contribution::validate(&loaded, "pot-1", Money::from_units(150)).expect("valid amount");
    let write = add.mutate(contribution);

    // The older read lands after the patch, carrying the pre-mutation balance.
    parked.respond(Ok(CachedData::Pots(vacation_and_emergency())));
    let late = refetch.await.expect("the caller still gets its own answer");
    assert_eq!(find_pot(&late, "pot-1").current_amount, Money::from_units(800));

    let patched = pots.peek();
    let vacation = find_pot(patched.data.as_deref().expect("pots"), "pot-1");
    assert_eq!(vacation.current_amount, Money::from_units(950));

    let (outcome, ()) = tokio::join!(write, async {
        gate.next_write()
            .await
            .respond(Ok(WriteResult::Pot(pot("pot-1", "Vacation Fund", 950, 1000))));
    });
    outcome.expect("contribution succeeds");
    let settled = pots.peek();
    assert_eq!(
        find_pot(settled.data.as_deref().expect("pots"), "pot-1").current_amount,
        Money::from_units(950)
    );
}

#[tokio::test]
async fn confirmed_contribution_invalidates_goal_dependents_only() {
    let (client, mut gate) = gated_client();
    let pots = hooks::use_pots(&client);
    let month = hooks::use_monthly_summary(&client, 2026, 10);
    let insight = hooks::use_ai_analysis(&client);
    let expenses = hooks::use_expenses(&client, &ExpenseQueryParams::default());

    let (loaded, monthly, insights, listed, ()) = tokio::join!(
        pots.resolve(),
        month.resolve(),
        insight.resolve(),
        expenses.resolve(),
        answer_reads(&mut gate, 4),
    );
    let loaded = loaded.expect("pots");
    monthly.expect("summary");
    insights.expect("analysis");
    listed.expect("expenses");

    let contribution =
        Contribution::validate(&loaded, "pot-1", Money::from_units(200)).expect("valid amount");
    let add = hooks::add_to_pot(&client);

    let (outcome, ()) = tokio::join!(add.mutate(contribution), async {
        let write = gate.next_write().await;
        assert_eq!(
            write.op,
            WriteOp::UpdatePot {
                id: "pot-1".to_string(),
                update: PotUpdate {
                    current_amount: Some(Money::from_units(1000)),
                    ..PotUpdate::default()
                },
            }
        );

        let optimistic = pots.peek().data.expect("optimistic pots");
        let vacation = find_pot(&optimistic, "pot-1");
        assert_eq!(vacation.current_amount, Money::from_units(1000));
        assert_eq!(vacation.progress_percentage, Percent::FULL);

        write.respond(Ok(WriteResult::Pot(pot("pot-1", "Vacation Fund", 1000, 1000))));
    });
    outcome.expect("contribution succeeds");

    let confirmed = pots.peek();
    assert_eq!(
        find_pot(confirmed.data.as_deref().expect("pots"), "pot-1").current_amount,
        Money::from_units(1000)
    );
    assert!(confirmed.is_stale);
    assert!(month.peek().is_stale);
    assert!(insight.peek().is_stale);
    assert!(!expenses.peek().is_stale);
}

#[tokio::test]
async fn late_response_never_overwrites_a_newer_one() {
    let (fetcher, mut gate) = GatedFetcher::new();
    let store = Arc::new(CacheStore::new(CacheConfig::default(), Arc::new(fetcher)));
    let key = QueryKey::bare(EntityTag::Pots);
    let older = CachedData::Pots(vec![pot("pot-1", "Vacation Fund", 800, 1000)]);
    let newer = CachedData::Pots(vec![pot("pot-1", "Vacation Fund", 900, 1000)]);

    let r1 = store.fetch(&key, FetchMode::Dedupe);
    let first = gate.next_read().await;
    let r2 = store.fetch(&key, FetchMode::Supersede);
    let second = gate.next_read().await;

    second.respond(Ok(newer.clone()));
    assert_eq!(r2.await, Ok(newer.clone()));

    first.respond(Ok(older.clone()));
    // The superseded caller still gets its own answer.
    assert_eq!(r1.await, Ok(older));

    let snapshot = store.get(&key).expect("entry");
    assert_eq!(snapshot.data, Some(newer));
    assert_eq!(snapshot.status, QueryStatus::Success);
    assert!(!snapshot.is_fetching);
}

#[tokio::test]
async fn late_failure_does_not_mark_newer_data_as_errored() {
    let (fetcher, mut gate) = GatedFetcher::new();
    let store = Arc::new(CacheStore::new(CacheConfig::default(), Arc::new(fetcher)));
    let key = QueryKey::bare(EntityTag::Categories);

    let r1 = store.fetch(&key, FetchMode::Dedupe);
    let first = gate.next_read().await;
    let r2 = store.fetch(&key, FetchMode::Supersede);
    let second = gate.next_read().await;

    second.respond(Ok(CachedData::Categories(Vec::new())));
    r2.await.expect("newer read");
    first.respond(Err(QueryError::network("connection reset")));
    assert!(r1.await.is_err());

    let snapshot = store.get(&key).expect("entry");
    assert_eq!(snapshot.status, QueryStatus::Success);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn concurrent_observers_share_one_request() {
    let (client, mut gate) = gated_client();
    let first = hooks::use_categories(&client);
    let second = hooks::use_categories(&client);

    let (a, b, ()) = tokio::join!(first.resolve(), second.resolve(), async {
        answer(gate.next_read().await);
    });
    assert_eq!(a.expect("first"), Vec::new());
    assert_eq!(b.expect("second"), Vec::new());
    assert!(gate.try_next_read().is_none());
}

#[tokio::test]
async fn repeated_invalidation_refetches_once() {
    let api = Arc::new(MemoryApi::dashboard());
    let fetcher: Arc<dyn Fetcher> = api.clone();
    let store = Arc::new(CacheStore::new(CacheConfig::default(), fetcher));
    let router = InvalidationRouter::new(Arc::clone(&store));
    let key = QueryKey::bare(EntityTag::Pots);

    store.fetch(&key, FetchMode::Dedupe).await.expect("initial load");
    assert_eq!(api.reads(EntityTag::Pots), 1);

    assert_eq!(router.invalidate(&[EntityTag::Pots]), 1);
    assert_eq!(router.invalidate(&[EntityTag::Pots]), 1);

    let refetch = store.ensure_fresh(&key).expect("stale entry refetches");
    assert!(store.ensure_fresh(&key).is_none(), "in-flight fetch is reused");
    refetch.await.expect("refetch");

    assert!(store.ensure_fresh(&key).is_none());
    assert_eq!(api.reads(EntityTag::Pots), 2);
}

#[tokio::test]
async fn stale_reads_keep_serving_data_while_revalidating() {
    let api = Arc::new(MemoryApi::dashboard());
    let client = QueryClient::new(CacheConfig::default(), api.clone());
    let pots = hooks::use_pots(&client);
    pots.resolve().await.expect("initial load");

    hooks::delete_pot(&client)
        .mutate("pot-2".to_string())
        .await
        .expect("delete succeeds");

    let state = pots.state();
    assert_eq!(state.data.as_ref().map(Vec::len), Some(1));
    assert!(state.is_stale);
    assert!(state.is_fetching);
    assert!(!state.is_loading);

    let refreshed = pots.resolve().await.expect("revalidated");
    assert!(!pots.peek().is_stale);
    assert_eq!(refreshed, api.pots());
    assert_eq!(api.reads(EntityTag::Pots), 2);
}

#[tokio::test]
async fn expense_deletion_converges_on_every_cached_list() {
    let api = Arc::new(MemoryApi::dashboard());
    let client = QueryClient::new(CacheConfig::default(), api.clone());
    let all = hooks::use_expenses(&client, &ExpenseQueryParams::default());
    let recent = hooks::use_recent_expenses(&client);
    all.resolve().await.expect("all expenses");
    recent.resolve().await.expect("recent expenses");

    hooks::delete_expense(&client)
        .mutate("exp-1".to_string())
        .await
        .expect("delete succeeds");

    for observer in [&all, &recent] {
        let state = observer.peek();
        let rows = state.data.expect("rows kept");
        assert!(rows.iter().all(|row| row.id != "exp-1"));
        assert!(state.is_stale);
    }

    let refreshed = all.resolve().await.expect("refetch");
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].id, "exp-2");
    assert_eq!(api.writes(), 1);
}

#[tokio::test]
async fn rejected_write_surfaces_the_server_message() {
    let api = Arc::new(MemoryApi::dashboard());
    let client = QueryClient::new(CacheConfig::default(), api.clone());
    let categories = hooks::use_categories(&client);
    let before = categories.resolve().await.expect("categories");
    api.fail_next_write(QueryError::rejected("Category already exists"));

    let outcome = hooks::create_category(&client)
        .mutate(aequitas_api_types::NewCategory {
            name: "Food".to_string(),
        })
        .await;

    assert_eq!(
        outcome.map_err(|err| err.to_string()),
        Err("Category already exists".to_string())
    );
    let state = categories.peek();
    assert_eq!(state.data, Some(before));
    assert!(!state.is_stale, "failed writes do not invalidate");
}
