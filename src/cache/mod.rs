//! Æquitas query cache
//!
//! Keeps server-derived records (expenses, monthly summaries, savings goals,
//! AI analysis, categories) for the lifetime of a session:
//!
//! - **Keys**: an entity tag plus normalized parameters identify a result
//! - **Store**: stale-while-revalidate reads, deduplicated fetches, and
//!   last-request-wins ordering per key
//! - **Mutations**: optimistic patches with rollback on failure
//! - **Invalidation**: a successful write marks related tags stale
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! stale_time_ms = 30000
//! gc_time_ms = 300000
//! search_debounce_ms = 500
//! default_page_size = 20
//! ```

mod client;
mod config;
mod data;
mod error;
mod fetcher;
mod invalidation;
mod keys;
mod lock;
mod mutation;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub(crate) use lock::mutex_lock;

pub use client::{MutationHandle, QueryClient, QueryObserver, QueryState};
pub use config::CacheConfig;
pub use data::{CachedData, Cacheable};
pub use error::QueryError;
pub use fetcher::{Fetcher, WriteOp, WriteResult};
pub use invalidation::{CATEGORY_WRITE, EXPENSE_WRITE, InvalidationRouter, POT_WRITE, WriteKind};
pub use keys::{EntityTag, IntoQueryParams, ParamValue, QueryKey, QueryParams, build_key};
pub use mutation::{MutationEngine, MutationSpec};
pub use store::{
    CacheStore, Epoch, FetchMode, FetchResult, QuerySnapshot, QueryStatus, SharedFetch,
    Subscription,
};

pub(crate) mod metric_names {
    pub(crate) use super::invalidation::METRIC_INVALIDATION_TOTAL;
    pub(crate) use super::mutation::METRIC_MUTATION_TOTAL;
    pub(crate) use super::store::{
        METRIC_QUERY_DEDUP_TOTAL, METRIC_QUERY_DISCARDED_TOTAL, METRIC_QUERY_FETCH_MS,
        METRIC_QUERY_FETCH_TOTAL,
    };
}
