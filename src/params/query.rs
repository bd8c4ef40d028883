//! Typed request parameters, one struct per parameterized entity.

use std::fmt;

use crate::cache::{EntityTag, IntoQueryParams, QueryKey, QueryParams, build_key};

/// Columns the expense list can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpenseSortField {
    Date,
    Amount,
    Title,
    Category,
}

impl ExpenseSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpenseSortField::Date => "date",
            ExpenseSortField::Amount => "amount",
            ExpenseSortField::Title => "title",
            ExpenseSortField::Category => "category",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of `GET /expenses`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExpenseQueryParams {
    pub search: Option<String>,
    pub category: Option<String>,
    pub is_avoidable: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<ExpenseSortField>,
    pub sort_order: Option<SortOrder>,
}

impl ExpenseQueryParams {
    /// The dashboard's "recent expenses" list.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn key(&self) -> QueryKey {
        build_key(EntityTag::Expenses, self)
    }
}

impl IntoQueryParams for ExpenseQueryParams {
    fn to_query_params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params
            .insert_opt("search", self.search.clone())
            .insert_opt("category", self.category.clone())
            .insert_opt("is_avoidable", self.is_avoidable)
            .insert_opt("start_date", self.start_date.clone())
            .insert_opt("end_date", self.end_date.clone())
            .insert_opt("skip", self.skip)
            .insert_opt("limit", self.limit)
            .insert_opt("sort_by", self.sort_by.map(ExpenseSortField::as_str))
            .insert_opt("sort_order", self.sort_order.map(SortOrder::as_str));
        params
    }
}

/// Parameters of `GET /expenses/summary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SummaryParams {
    pub year: i32,
    pub month: u8,
}

impl SummaryParams {
    pub fn new(year: i32, month: u8) -> Self {
        Self { year, month }
    }

    /// The month containing `date`.
    pub fn for_date(date: time::Date) -> Self {
        Self::new(date.year(), u8::from(date.month()))
    }

    pub fn key(&self) -> QueryKey {
        build_key(EntityTag::ExpensesSummary, self)
    }
}

impl IntoQueryParams for SummaryParams {
    fn to_query_params(&self) -> QueryParams {
        QueryParams::new()
            .with("year", self.year)
            .with("month", self.month)
    }
}
