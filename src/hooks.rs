//! Per-entity queries and mutations used by the dashboard.
//!
//! Every helper goes through [`QueryClient::use_entity_query`] or
//! [`QueryClient::use_entity_mutation`]; none of them touch the store.

use aequitas_api_types::{
    AiAnalysis, Category, Expense, ExpenseSummary, ExpenseUpdate, Money, NewCategory, NewExpense,
    NewPot, Pot, PotUpdate,
};

use crate::cache::{
    EntityTag, MutationHandle, MutationSpec, QueryClient, QueryError, QueryKey, QueryObserver,
    WriteOp, WriteResult,
};
use crate::params::{ExpenseQueryParams, SummaryParams};

/// Rows shown in the dashboard's "recent expenses" panel.
pub const RECENT_EXPENSES_LIMIT: u32 = 5;

// ============================================================================
// Queries
// ============================================================================

pub fn pots_key() -> QueryKey {
    QueryKey::bare(EntityTag::Pots)
}

pub fn analysis_key() -> QueryKey {
    QueryKey::bare(EntityTag::AiAnalysis)
}

pub fn categories_key() -> QueryKey {
    QueryKey::bare(EntityTag::Categories)
}

pub fn use_expenses(client: &QueryClient, params: &ExpenseQueryParams) -> QueryObserver<Vec<Expense>> {
    client.use_entity_query(params.key())
}

pub fn use_recent_expenses(client: &QueryClient) -> QueryObserver<Vec<Expense>> {
    use_expenses(client, &ExpenseQueryParams::recent(RECENT_EXPENSES_LIMIT))
}

pub fn use_monthly_summary(client: &QueryClient, year: i32, month: u8) -> QueryObserver<ExpenseSummary> {
    client.use_entity_query(SummaryParams::new(year, month).key())
}

pub fn use_pots(client: &QueryClient) -> QueryObserver<Vec<Pot>> {
    client.use_entity_query(pots_key())
}

pub fn use_ai_analysis(client: &QueryClient) -> QueryObserver<AiAnalysis> {
    client.use_entity_query(analysis_key())
}

pub fn use_categories(client: &QueryClient) -> QueryObserver<Vec<Category>> {
    client.use_entity_query(categories_key())
}

// ============================================================================
// Savings goals
// ============================================================================

/// A validated contribution to one savings goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub pot_id: String,
    pub amount: Money,
    /// Absolute balance sent to the server, computed from the confirmed
    /// (pre-patch) balance.
    pub new_total: Money,
}

impl Contribution {
    /// Check `amount` against the goal `pot_id` in `pots`.
    pub fn validate(pots: &[Pot], pot_id: &str, amount: Money) -> Result<Self, QueryError> {
        let pot = pots
            .iter()
            .find(|pot| pot.id == pot_id)
            .ok_or_else(|| QueryError::validation(format!("Goal {pot_id} not found")))?;
        if !amount.is_positive() {
            return Err(QueryError::validation("Please enter a valid numeric value."));
        }
        let new_total = pot
            .current_amount
            .checked_add(amount)
            .filter(|total| *total <= pot.target_amount)
            .ok_or_else(|| {
                QueryError::validation(format!(
                    "This contribution would exceed your {} goal limit.",
                    pot.target_amount
                ))
            })?;
        Ok(Self {
            pot_id: pot.id.clone(),
            amount,
            new_total,
        })
    }
}

fn replace_pot(pots: &[Pot], confirmed: &Pot) -> Vec<Pot> {
    pots.iter()
        .map(|pot| {
            if pot.id == confirmed.id {
                confirmed.clone()
            } else {
                pot.clone()
            }
        })
        .collect()
}

/// Add money to a savings goal, showing the new balance immediately.
pub fn add_to_pot(client: &QueryClient) -> MutationHandle<Contribution, Vec<Pot>, WriteResult> {
    let spec = MutationSpec::write("pots.add_money", client.fetcher(), |contribution: Contribution| {
        WriteOp::UpdatePot {
            id: contribution.pot_id,
            update: PotUpdate {
                current_amount: Some(contribution.new_total),
                ..PotUpdate::default()
            },
        }
    })
    .target(pots_key())
    .predict(|contribution: &Contribution, pots: &Vec<Pot>| {
        pots.iter()
            .map(|pot| {
                if pot.id == contribution.pot_id {
                    pot.with_contribution(contribution.amount)
                } else {
                    pot.clone()
                }
            })
            .collect()
    })
    .reconcile(|_, pots: &Vec<Pot>, result: &WriteResult| match result {
        WriteResult::Pot(confirmed) => replace_pot(pots, confirmed),
        _ => pots.clone(),
    });
    client.use_entity_mutation(spec)
}

pub fn create_pot(client: &QueryClient) -> MutationHandle<NewPot, Vec<Pot>, WriteResult> {
    let spec = MutationSpec::write("pots.create", client.fetcher(), WriteOp::CreatePot);
    client.use_entity_mutation(spec)
}

pub fn delete_pot(client: &QueryClient) -> MutationHandle<String, Vec<Pot>, WriteResult> {
    let spec = MutationSpec::write("pots.delete", client.fetcher(), |id: String| {
        WriteOp::DeletePot { id }
    })
    .target(pots_key())
    .predict(|id: &String, pots: &Vec<Pot>| {
        pots.iter().filter(|pot| &pot.id != id).cloned().collect()
    });
    client.use_entity_mutation(spec)
}

// ============================================================================
// Expenses
// ============================================================================

pub fn create_expense(client: &QueryClient) -> MutationHandle<NewExpense, Vec<Expense>, WriteResult> {
    let spec = MutationSpec::write("expenses.create", client.fetcher(), WriteOp::CreateExpense);
    client.use_entity_mutation(spec)
}

/// Variables for [`update_expense`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseEdit {
    pub id: String,
    pub update: ExpenseUpdate,
}

fn apply_edit(expense: &Expense, update: &ExpenseUpdate) -> Expense {
    let mut edited = expense.clone();
    if let Some(title) = &update.title {
        edited.title = title.clone();
    }
    if let Some(amount) = update.amount {
        edited.amount = amount;
    }
    if let Some(category) = &update.category {
        edited.category = category.clone();
    }
    if let Some(date) = &update.date {
        edited.date = date.clone();
    }
    if let Some(is_avoidable) = update.is_avoidable {
        edited.is_avoidable = is_avoidable;
    }
    edited
}

/// Edit an expense in every cached list that shows it.
pub fn update_expense(client: &QueryClient) -> MutationHandle<ExpenseEdit, Vec<Expense>, WriteResult> {
    let spec = MutationSpec::write("expenses.update", client.fetcher(), |edit: ExpenseEdit| {
        WriteOp::UpdateExpense {
            id: edit.id,
            update: edit.update,
        }
    })
    .target_tag(EntityTag::Expenses)
    .predict(|edit: &ExpenseEdit, expenses: &Vec<Expense>| {
        expenses
            .iter()
            .map(|expense| {
                if expense.id == edit.id {
                    apply_edit(expense, &edit.update)
                } else {
                    expense.clone()
                }
            })
            .collect()
    })
    .reconcile(|_, expenses: &Vec<Expense>, result: &WriteResult| match result {
        WriteResult::Expense(confirmed) => expenses
            .iter()
            .map(|expense| {
                if expense.id == confirmed.id {
                    confirmed.clone()
                } else {
                    expense.clone()
                }
            })
            .collect(),
        _ => expenses.clone(),
    });
    client.use_entity_mutation(spec)
}

/// Delete an expense, removing it from every cached list at once.
pub fn delete_expense(client: &QueryClient) -> MutationHandle<String, Vec<Expense>, WriteResult> {
    let spec = MutationSpec::write("expenses.delete", client.fetcher(), |id: String| {
        WriteOp::DeleteExpense { id }
    })
    .target_tag(EntityTag::Expenses)
    .predict(|id: &String, expenses: &Vec<Expense>| {
        expenses
            .iter()
            .filter(|expense| &expense.id != id)
            .cloned()
            .collect()
    });
    client.use_entity_mutation(spec)
}

// ============================================================================
// Categories
// ============================================================================

pub fn create_category(client: &QueryClient) -> MutationHandle<NewCategory, Vec<Category>, WriteResult> {
    let spec = MutationSpec::write("categories.create", client.fetcher(), WriteOp::CreateCategory);
    client.use_entity_mutation(spec)
}

pub fn delete_category(client: &QueryClient) -> MutationHandle<String, Vec<Category>, WriteResult> {
    let spec = MutationSpec::write("categories.delete", client.fetcher(), |id: String| {
        WriteOp::DeleteCategory { id }
    })
    .target(categories_key())
    .predict(|id: &String, categories: &Vec<Category>| {
        categories
            .iter()
            .filter(|category| &category.id != id)
            .cloned()
            .collect()
    });
    client.use_entity_mutation(spec)
}
