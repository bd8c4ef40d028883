//! Expense list UI state.
//!
//! Pages are 1-based. Changing anything other than the page itself sends
//! the list back to page 1, since the old page may no longer exist.

use std::num::NonZeroU32;

use super::query::{ExpenseQueryParams, ExpenseSortField, SortOrder};

/// Direction a newly selected sort column starts in.
pub const DEFAULT_SORT_ORDER: SortOrder = SortOrder::Desc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub field: ExpenseSortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseFilters {
    search: Option<String>,
    category: Option<String>,
    avoidable: Option<bool>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: NonZeroU32,
    page_size: NonZeroU32,
    sort: Option<SortState>,
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn normalize(text: Option<String>) -> Option<String> {
    text.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl ExpenseFilters {
    pub fn new(page_size: NonZeroU32) -> Self {
        Self {
            search: None,
            category: None,
            avoidable: None,
            start_date: None,
            end_date: None,
            page: NonZeroU32::MIN,
            page_size,
            sort: None,
        }
    }

    pub fn page(&self) -> u32 {
        self.page.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn sort(&self) -> Option<SortState> {
        self.sort
    }

    /// Apply a filter change; resets the page only when something changed.
    fn refilter(&mut self, changed: bool) -> bool {
        if changed {
            self.page = NonZeroU32::MIN;
        }
        changed
    }

    pub fn set_search(&mut self, term: impl Into<String>) -> bool {
        let changed = replace(&mut self.search, normalize(Some(term.into())));
        self.refilter(changed)
    }

    pub fn set_category(&mut self, category: Option<String>) -> bool {
        let changed = replace(&mut self.category, normalize(category));
        self.refilter(changed)
    }

    pub fn set_avoidable(&mut self, avoidable: Option<bool>) -> bool {
        let changed = replace(&mut self.avoidable, avoidable);
        self.refilter(changed)
    }

    pub fn set_date_range(&mut self, start: Option<String>, end: Option<String>) -> bool {
        let start_changed = replace(&mut self.start_date, normalize(start));
        let end_changed = replace(&mut self.end_date, normalize(end));
        self.refilter(start_changed || end_changed)
    }

    /// Select `field`; selecting the active column flips its direction.
    pub fn toggle_sort(&mut self, field: ExpenseSortField) -> bool {
        let next = match self.sort {
            Some(current) if current.field == field => SortState {
                field,
                order: current.order.flipped(),
            },
            _ => SortState {
                field,
                order: DEFAULT_SORT_ORDER,
            },
        };
        self.sort = Some(next);
        self.refilter(true)
    }

    pub fn set_sort(&mut self, sort: Option<SortState>) -> bool {
        let changed = replace(&mut self.sort, sort);
        self.refilter(changed)
    }

    /// Also resets to page 1: row offsets mean nothing under a new size.
    pub fn set_page_size(&mut self, page_size: NonZeroU32) -> bool {
        let changed = replace(&mut self.page_size, page_size);
        self.refilter(changed)
    }

    /// Jump to `page`; 0 is treated as 1.
    pub fn set_page(&mut self, page: u32) -> bool {
        replace(&mut self.page, NonZeroU32::new(page).unwrap_or(NonZeroU32::MIN))
    }

    pub fn next_page(&mut self) -> bool {
        self.set_page(self.page.get().saturating_add(1))
    }

    pub fn previous_page(&mut self) -> bool {
        self.set_page(self.page.get().saturating_sub(1))
    }

    /// Clear every filter, keeping the page size.
    pub fn reset(&mut self) -> bool {
        let fresh = Self::new(self.page_size);
        replace(self, fresh)
    }

    pub fn params(&self) -> ExpenseQueryParams {
        let limit = self.page_size.get();
        ExpenseQueryParams {
            search: self.search.clone(),
            category: self.category.clone(),
            is_avoidable: self.avoidable,
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            skip: Some((self.page.get() - 1).saturating_mul(limit)),
            limit: Some(limit),
            sort_by: self.sort.map(|sort| sort.field),
            sort_order: self.sort.map(|sort| sort.order),
        }
    }
}
