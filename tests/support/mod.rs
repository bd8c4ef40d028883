//! Shared fixtures for the cache integration tests.
//!
//! `GatedFetcher` parks every request until the test answers it, which makes
//! response ordering explicit. `MemoryApi` is a tiny in-process server that
//! applies writes to its own state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use aequitas::cache::{CachedData, EntityTag, Fetcher, QueryError, QueryKey, WriteOp, WriteResult};
use aequitas_api_types::{
    AiAnalysis, Category, Expense, ExpenseSummary, Money, Percent, Pot, PotPriority,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub fn pot(id: &str, title: &str, current: i64, target: i64) -> Pot {
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

pub fn vacation_and_emergency() -> Vec<Pot> {
    vec![
        pot("pot-1", "Vacation Fund", 800, 1000),
        pot("pot-2", "Emergency Fund", 200, 5000),
    ]
}

pub fn expense(id: &str, title: &str, amount: i64, category: &str) -> Expense {
    Expense {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        title: title.to_string(),
        amount: Money::from_units(amount),
        category: category.to_string(),
        emotion: None,
        is_avoidable: false,
        date: "2026-10-01".to_string(),
        created_at: "2026-10-01T09:00:00Z".to_string(),
    }
}

pub fn summary(total: i64, count: u64) -> ExpenseSummary {
    ExpenseSummary {
        total_amount: Money::from_units(total),
        count,
        lifetime_total: Money::from_units(total),
        category_breakdown: Default::default(),
    }
}

pub fn analysis(summary: &str) -> AiAnalysis {
    AiAnalysis {
        summary: summary.to_string(),
        suggestions: Vec::new(),
        discipline_score: 72.0,
        savings_rate: 0.18,
        timeline_impact: String::new(),
        savings_potential: Money::from_units(120),
    }
}

pub fn find_pot<'a>(pots: &'a [Pot], id: &str) -> &'a Pot {
    pots.iter()
        .find(|pot| pot.id == id)
        .unwrap_or_else(|| panic!("pot {id} missing"))
}

// ============================================================================
// Gated fetcher
// ============================================================================

pub struct PendingRead {
    pub key: QueryKey,
    reply: oneshot::Sender<Result<CachedData, QueryError>>,
}

impl PendingRead {
    pub fn respond(self, result: Result<CachedData, QueryError>) {
        let _ = self.reply.send(result);
    }
}

pub struct PendingWrite {
    pub op: WriteOp,
    reply: oneshot::Sender<Result<WriteResult, QueryError>>,
}

impl PendingWrite {
    pub fn respond(self, result: Result<WriteResult, QueryError>) {
        let _ = self.reply.send(result);
    }
}

/// Forwards every request to the test and waits for its answer.
pub struct GatedFetcher {
    reads: mpsc::UnboundedSender<PendingRead>,
    writes: mpsc::UnboundedSender<PendingWrite>,
}

pub struct Gate {
    reads: mpsc::UnboundedReceiver<PendingRead>,
    writes: mpsc::UnboundedReceiver<PendingWrite>,
}

impl GatedFetcher {
    pub fn new() -> (Self, Gate) {
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        (
            Self {
                reads: read_tx,
                writes: write_tx,
            },
            Gate {
                reads: read_rx,
                writes: write_rx,
            },
        )
    }
}

impl Gate {
    pub async fn next_read(&mut self) -> PendingRead {
        self.reads.recv().await.expect("read channel open")
    }

    pub async fn next_write(&mut self) -> PendingWrite {
        self.writes.recv().await.expect("write channel open")
    }

    pub fn try_next_read(&mut self) -> Option<PendingRead> {
        self.reads.try_recv().ok()
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn read(&self, key: &QueryKey) -> Result<CachedData, QueryError> {
        let (reply, answer) = oneshot::channel();
        self.reads
            .send(PendingRead {
                key: key.clone(),
                reply,
            })
            .map_err(|_| QueryError::network("gate closed"))?;
        answer
            .await
            .unwrap_or_else(|_| Err(QueryError::network("request abandoned")))
    }

    async fn write(&self, op: WriteOp) -> Result<WriteResult, QueryError> {
        let (reply, answer) = oneshot::channel();
        self.writes
            .send(PendingWrite { op, reply })
            .map_err(|_| QueryError::network("gate closed"))?;
        answer
            .await
            .unwrap_or_else(|_| Err(QueryError::network("request abandoned")))
    }
}

// ============================================================================
// In-memory API
// ============================================================================

#[derive(Default)]
struct MemoryState {
    pots: Vec<Pot>,
    expenses: Vec<Expense>,
    summary: Option<ExpenseSummary>,
    analysis: Option<AiAnalysis>,
    categories: Vec<Category>,
}

/// Serves reads from its state and applies writes to it.
#[derive(Default)]
pub struct MemoryApi {
    state: Mutex<MemoryState>,
    reads: Mutex<HashMap<EntityTag, usize>>,
    writes: AtomicUsize,
    fail_next_write: Mutex<Option<QueryError>>,
}

impl MemoryApi {
    pub fn dashboard() -> Self {
        let api = Self::default();
        {
            let mut state = api.state.lock().unwrap();
            state.pots = vacation_and_emergency();
            state.expenses = vec![
                expense("exp-1", "Coffee", 4, "Food"),
                expense("exp-2", "Train", 12, "Transport"),
            ];
            state.summary = Some(summary(16, 2));
            state.analysis = Some(analysis("Spending is steady."));
            state.categories = vec![Category {
                id: "cat-1".to_string(),
                name: "Food".to_string(),
                user_id: None,
            }];
        }
        api
    }

    pub fn reads(&self, tag: EntityTag) -> usize {
        self.reads.lock().unwrap().get(&tag).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn pots(&self) -> Vec<Pot> {
        self.state.lock().unwrap().pots.clone()
    }

    pub fn fail_next_write(&self, error: QueryError) {
        *self.fail_next_write.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Fetcher for MemoryApi {
    async fn read(&self, key: &QueryKey) -> Result<CachedData, QueryError> {
        *self.reads.lock().unwrap().entry(key.tag()).or_insert(0) += 1;
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        let data = match key.tag() {
            EntityTag::Pots => CachedData::Pots(state.pots.clone()),
            EntityTag::Expenses => CachedData::Expenses(state.expenses.clone()),
            EntityTag::ExpensesSummary => CachedData::Summary(
                state
                    .summary
                    .clone()
                    .ok_or_else(|| QueryError::rejected("No summary"))?,
            ),
            EntityTag::AiAnalysis => CachedData::Analysis(
                state
                    .analysis
                    .clone()
                    .ok_or_else(|| QueryError::rejected("No analysis"))?,
            ),
            EntityTag::Categories => CachedData::Categories(state.categories.clone()),
        };
        Ok(data)
    }

    async fn write(&self, op: WriteOp) -> Result<WriteResult, QueryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(error) = self.fail_next_write.lock().unwrap().take() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        match op {
            WriteOp::UpdatePot { id, update } => {
                let pot = state
                    .pots
                    .iter_mut()
                    .find(|pot| pot.id == id)
                    .ok_or_else(|| QueryError::rejected("Pot not found"))?;
                if let Some(current) = update.current_amount {
                    *pot = pot.with_current_amount(current);
                }
                Ok(WriteResult::Pot(pot.clone()))
            }
            WriteOp::DeletePot { id } => {
                state.pots.retain(|pot| pot.id != id);
                Ok(WriteResult::Deleted)
            }
            WriteOp::DeleteExpense { id } => {
                state.expenses.retain(|expense| expense.id != id);
                Ok(WriteResult::Deleted)
            }
            WriteOp::CreateCategory(category) => {
                let created = Category {
                    id: format!("cat-{}", state.categories.len() + 1),
                    name: category.name,
                    user_id: Some("user-1".to_string()),
                };
                state.categories.push(created.clone());
                Ok(WriteResult::Category(created))
            }
            other => Err(QueryError::rejected(format!(
                "{} is not supported by the test server",
                other.name()
            ))),
        }
    }
}
