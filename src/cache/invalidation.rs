//! Invalidation routing.
//!
//! Maps a successful write to the entity tags whose cached results depend on
//! it and marks those entries stale. Stale entries keep their data; the next
//! read refetches them in the background.

use std::sync::Arc;

use metrics::counter;
use tracing::info;

use super::fetcher::WriteOp;
use super::keys::EntityTag;
use super::store::CacheStore;

pub(crate) const METRIC_INVALIDATION_TOTAL: &str = "aequitas_invalidation_total";

/// Expense writes change lists, the monthly summary and the AI insight.
/// Savings goals are unaffected.
pub const EXPENSE_WRITE: &[EntityTag] = &[
    EntityTag::Expenses,
    EntityTag::ExpensesSummary,
    EntityTag::AiAnalysis,
];

/// Savings-goal writes never touch expense lists.
pub const POT_WRITE: &[EntityTag] = &[
    EntityTag::Pots,
    EntityTag::AiAnalysis,
    EntityTag::ExpensesSummary,
];

pub const CATEGORY_WRITE: &[EntityTag] = &[EntityTag::Categories];

/// The group a write belongs to, for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Expense,
    Pot,
    Category,
}

impl WriteKind {
    pub fn of(op: &WriteOp) -> Self {
        match op {
            WriteOp::CreateExpense(_)
            | WriteOp::UpdateExpense { .. }
            | WriteOp::DeleteExpense { .. } => WriteKind::Expense,
            WriteOp::CreatePot(_) | WriteOp::UpdatePot { .. } | WriteOp::DeletePot { .. } => {
                WriteKind::Pot
            }
            WriteOp::CreateCategory(_) | WriteOp::DeleteCategory { .. } => WriteKind::Category,
        }
    }

    /// Tags to invalidate after a write of this kind succeeds.
    pub fn plan(self) -> &'static [EntityTag] {
        match self {
            WriteKind::Expense => EXPENSE_WRITE,
            WriteKind::Pot => POT_WRITE,
            WriteKind::Category => CATEGORY_WRITE,
        }
    }
}

#[derive(Clone)]
pub struct InvalidationRouter {
    store: Arc<CacheStore>,
}

impl InvalidationRouter {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Mark every entry under any of `tags` stale. Returns the number of
    /// entries marked.
    pub fn invalidate(&self, tags: &[EntityTag]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let marked = self.store.mark_stale(|key| tags.contains(&key.tag()));
        for tag in tags {
            counter!(METRIC_INVALIDATION_TOTAL, "tag" => tag.as_str()).increment(1);
        }
        let labels: Vec<&str> = tags.iter().map(|tag| tag.as_str()).collect();
        info!(tags = ?labels, marked, "Query cache entries invalidated");
        marked
    }
}
