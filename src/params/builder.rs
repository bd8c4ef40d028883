//! Glue between filter state, the search debouncer and query parameters.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::cache::{CacheConfig, QueryKey, mutex_lock};

use super::debounce::Debouncer;
use super::filters::{ExpenseFilters, SortState};
use super::query::{ExpenseQueryParams, ExpenseSortField};

const SOURCE: &str = "params::builder";

struct Shared {
    filters: Mutex<ExpenseFilters>,
    params: watch::Sender<ExpenseQueryParams>,
    revision: AtomicU64,
}

impl Shared {
    /// Run `change` against the filters and publish new parameters if the
    /// committed parameters actually differ.
    fn update(&self, change: impl FnOnce(&mut ExpenseFilters) -> bool) -> bool {
        let mut filters = mutex_lock(&self.filters, SOURCE, "update");
        if !change(&mut *filters) {
            return false;
        }
        let next = filters.params();
        let published = self.params.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if published {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                revision,
                key = %filters.params().key(),
                "Expense query parameters changed"
            );
        }
        published
    }
}

/// Produces the committed [`ExpenseQueryParams`] for the expense list.
///
/// Every setter except [`ParamsBuilder::type_search`] commits immediately.
/// Search input is debounced so a burst of keystrokes yields one change.
pub struct ParamsBuilder {
    shared: Arc<Shared>,
    search: Debouncer<String>,
}

impl ParamsBuilder {
    /// Must be called inside a Tokio runtime.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_filters(
            ExpenseFilters::new(config.page_size_non_zero()),
            config.search_debounce(),
        )
    }

    pub fn with_filters(filters: ExpenseFilters, debounce: Duration) -> Self {
        let (params, _) = watch::channel(filters.params());
        let shared = Arc::new(Shared {
            filters: Mutex::new(filters),
            params,
            revision: AtomicU64::new(0),
        });
        let search_target = Arc::clone(&shared);
        let search = Debouncer::new(debounce, move |term: String| {
            search_target.update(|filters| filters.set_search(term));
        });
        Self { shared, search }
    }

    pub fn subscribe(&self) -> watch::Receiver<ExpenseQueryParams> {
        self.shared.params.subscribe()
    }

    pub fn current(&self) -> ExpenseQueryParams {
        self.shared.params.borrow().clone()
    }

    pub fn key(&self) -> QueryKey {
        self.current().key()
    }

    /// Number of committed parameter changes so far.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> ExpenseFilters {
        mutex_lock(&self.shared.filters, SOURCE, "filters").clone()
    }

    /// Feed raw search box input; committed after the debounce window.
    pub fn type_search(&self, input: impl Into<String>) {
        self.search.push(input.into());
    }

    /// Commit search text immediately, bypassing the debounce.
    pub fn commit_search(&self, input: impl Into<String>) -> bool {
        let input = input.into();
        self.shared.update(|filters| filters.set_search(input))
    }

    pub fn set_category(&self, category: Option<String>) -> bool {
        self.shared.update(|filters| filters.set_category(category))
    }

    pub fn set_avoidable(&self, avoidable: Option<bool>) -> bool {
        self.shared.update(|filters| filters.set_avoidable(avoidable))
    }

    pub fn set_date_range(&self, start: Option<String>, end: Option<String>) -> bool {
        self.shared
            .update(|filters| filters.set_date_range(start, end))
    }

    pub fn toggle_sort(&self, field: ExpenseSortField) -> bool {
        self.shared.update(|filters| filters.toggle_sort(field))
    }

    pub fn set_sort(&self, sort: Option<SortState>) -> bool {
        self.shared.update(|filters| filters.set_sort(sort))
    }

    pub fn set_page(&self, page: u32) -> bool {
        self.shared.update(|filters| filters.set_page(page))
    }

    pub fn next_page(&self) -> bool {
        self.shared.update(ExpenseFilters::next_page)
    }

    pub fn previous_page(&self) -> bool {
        self.shared.update(ExpenseFilters::previous_page)
    }

    pub fn set_page_size(&self, page_size: NonZeroU32) -> bool {
        self.shared
            .update(|filters| filters.set_page_size(page_size))
    }

    pub fn reset(&self) -> bool {
        self.shared.update(ExpenseFilters::reset)
    }
}
