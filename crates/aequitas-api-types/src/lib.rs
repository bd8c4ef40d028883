//! Request and response types for the Æquitas finance API.
//!
//! Every endpoint wraps its payload in [`Envelope`]. Entity structs mirror the
//! JSON the server sends; monetary fields use [`Money`] so client-side
//! arithmetic keeps the server's two-decimal semantics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod money;

pub use money::{Money, ParseMoneyError, Percent};

/// Uniform response envelope returned by every API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub message: String,
}

impl<T> Envelope<T> {
    /// Field-level validation failures carried in `error.details`, if any.
    pub fn validation_details(&self) -> Option<Vec<ValidationDetail>> {
        let details = self.error.as_ref()?.get("details")?.as_array()?;
        Some(
            details
                .iter()
                .filter_map(|detail| ValidationDetail::deserialize(detail).ok())
                .collect(),
        )
    }
}

/// One entry of a validation error list (`{"loc": [...], "msg": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetail {
    #[serde(default)]
    pub loc: Vec<Value>,
    pub msg: String,
}

impl ValidationDetail {
    /// The offending field: the last element of `loc`.
    pub fn field(&self) -> String {
        match self.loc.last() {
            Some(Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => "body".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub title: String,
    pub amount: Money,
    pub category: String,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub is_avoidable: bool,
    pub date: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PotPriority {
    Low,
    Medium,
    High,
}

/// A savings goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pot {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub title: String,
    pub target_amount: Money,
    pub current_amount: Money,
    pub target_date: String,
    pub priority: PotPriority,
    pub progress_percentage: Percent,
    pub remaining_amount: Money,
}

impl Pot {
    /// The same goal with `current_amount` replaced and the derived
    /// progress/remaining fields recomputed the way the server does.
    pub fn with_current_amount(&self, current: Money) -> Pot {
        Pot {
            current_amount: current,
            progress_percentage: Percent::progress(current, self.target_amount),
            remaining_amount: self.target_amount.saturating_remaining(current),
            ..self.clone()
        }
    }

    pub fn with_contribution(&self, amount: Money) -> Pot {
        self.with_current_amount(self.current_amount + amount)
    }

    pub fn is_complete(&self) -> bool {
        self.progress_percentage >= Percent::FULL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub total_amount: Money,
    pub count: u64,
    #[serde(default)]
    pub lifetime_total: Money,
    #[serde(default)]
    pub category_breakdown: BTreeMap<String, Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: String,
    pub reduction: Money,
    pub reason: String,
}

/// Opaque AI insight payload; the cache never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub summary: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    pub discipline_score: f64,
    pub savings_rate: f64,
    #[serde(default)]
    pub timeline_impact: String,
    pub savings_potential: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ============================================================================
// Write payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub title: String,
    pub amount: Money,
    pub category: String,
    pub date: String,
    pub is_avoidable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_avoidable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPot {
    pub title: String,
    pub target_amount: Money,
    pub current_amount: Money,
    pub target_date: String,
    pub priority: PotPriority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<PotPriority>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
}
