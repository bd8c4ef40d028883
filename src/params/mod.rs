//! Parameter building for parameterized queries.
//!
//! Turns filter, sort and pagination UI state into normalized request
//! parameters. Free-text search is debounced before it reaches a query key.

mod builder;
mod debounce;
mod filters;
mod query;

pub use builder::ParamsBuilder;
pub use debounce::Debouncer;
pub use filters::{DEFAULT_SORT_ORDER, ExpenseFilters, SortState};
pub use query::{ExpenseQueryParams, ExpenseSortField, SortOrder, SummaryParams};
