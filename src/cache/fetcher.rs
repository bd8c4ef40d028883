//! The API boundary as seen by the cache.

use aequitas_api_types::{
    Category, Expense, ExpenseUpdate, NewCategory, NewExpense, NewPot, Pot, PotUpdate,
};
use async_trait::async_trait;

use super::data::CachedData;
use super::error::QueryError;
use super::keys::{EntityTag, QueryKey};

/// Executes reads and writes against the remote API.
///
/// Implementations own envelope handling and must report every failure as a
/// normalized [`QueryError`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn read(&self, key: &QueryKey) -> Result<CachedData, QueryError>;

    async fn write(&self, op: WriteOp) -> Result<WriteResult, QueryError>;
}

/// A single write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    CreateExpense(NewExpense),
    UpdateExpense { id: String, update: ExpenseUpdate },
    DeleteExpense { id: String },
    CreatePot(NewPot),
    UpdatePot { id: String, update: PotUpdate },
    DeletePot { id: String },
    CreateCategory(NewCategory),
    DeleteCategory { id: String },
}

impl WriteOp {
    /// The entity group this write changes.
    pub fn entity(&self) -> EntityTag {
        match self {
            WriteOp::CreateExpense(_)
            | WriteOp::UpdateExpense { .. }
            | WriteOp::DeleteExpense { .. } => EntityTag::Expenses,
            WriteOp::CreatePot(_) | WriteOp::UpdatePot { .. } | WriteOp::DeletePot { .. } => {
                EntityTag::Pots
            }
            WriteOp::CreateCategory(_) | WriteOp::DeleteCategory { .. } => EntityTag::Categories,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::CreateExpense(_) => "expense.create",
            WriteOp::UpdateExpense { .. } => "expense.update",
            WriteOp::DeleteExpense { .. } => "expense.delete",
            WriteOp::CreatePot(_) => "pot.create",
            WriteOp::UpdatePot { .. } => "pot.update",
            WriteOp::DeletePot { .. } => "pot.delete",
            WriteOp::CreateCategory(_) => "category.create",
            WriteOp::DeleteCategory { .. } => "category.delete",
        }
    }
}

/// The server-confirmed outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Expense(Expense),
    Pot(Pot),
    Category(Category),
    Deleted,
}
