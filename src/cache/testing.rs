//! In-memory fetcher for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use aequitas_api_types::{Money, Percent, Pot, PotPriority};
use async_trait::async_trait;

use super::data::CachedData;
use super::error::QueryError;
use super::fetcher::{Fetcher, WriteOp, WriteResult};
use super::keys::{EntityTag, QueryKey};

pub(crate) fn pot(id: &str, title: &str, current: i64, target: i64) -> Pot {
    let current = Money::from_units(current);
    let target = Money::from_units(target);
    Pot {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        title: title.to_string(),
        target_amount: target,
        current_amount: current,
        target_date: "2026-12-01".to_string(),
        priority: PotPriority::High,
        progress_percentage: Percent::progress(current, target),
        remaining_amount: target.saturating_remaining(current),
    }
}

pub(crate) fn pots_fixture() -> Vec<Pot> {
    vec![
        pot("pot-1", "Vacation Fund", 800, 1000),
        pot("pot-2", "Emergency Fund", 200, 5000),
    ]
}

/// Answers reads from a per-tag table and writes from a scripted queue.
#[derive(Default)]
pub(crate) struct StubFetcher {
    server: Mutex<HashMap<EntityTag, CachedData>>,
    reads: AtomicUsize,
    read_failure: Mutex<Option<QueryError>>,
    writes: Mutex<Vec<WriteOp>>,
    write_results: Mutex<VecDeque<Result<WriteResult, QueryError>>>,
}

impl StubFetcher {
    pub(crate) fn with_pots(pots: Vec<Pot>) -> Self {
        let stub = Self::default();
        stub.serve(EntityTag::Pots, CachedData::Pots(pots));
        stub
    }

    pub(crate) fn serve(&self, tag: EntityTag, data: CachedData) {
        self.server.lock().unwrap().insert(tag, data);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_reads(&self, error: QueryError) {
        *self.read_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn push_write_result(&self, result: Result<WriteResult, QueryError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn writes(&self) -> Vec<WriteOp> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn read(&self, key: &QueryKey) -> Result<CachedData, QueryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.read_failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.server
            .lock()
            .unwrap()
            .get(&key.tag())
            .cloned()
            .ok_or_else(|| QueryError::decode(format!("no fixture for {key}")))
    }

    async fn write(&self, op: WriteOp) -> Result<WriteResult, QueryError> {
        self.writes.lock().unwrap().push(op);
        self.write_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(WriteResult::Deleted))
    }
}
