//! Payloads held by cache entries.

use aequitas_api_types::{AiAnalysis, Category, Expense, ExpenseSummary, Pot};
use serde_json::Value;

use super::keys::EntityTag;

/// A cached server result. One variant per entity tag.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    Expenses(Vec<Expense>),
    Summary(ExpenseSummary),
    Pots(Vec<Pot>),
    Analysis(AiAnalysis),
    Categories(Vec<Category>),
}

impl CachedData {
    pub fn tag(&self) -> EntityTag {
        match self {
            CachedData::Expenses(_) => EntityTag::Expenses,
            CachedData::Summary(_) => EntityTag::ExpensesSummary,
            CachedData::Pots(_) => EntityTag::Pots,
            CachedData::Analysis(_) => EntityTag::AiAnalysis,
            CachedData::Categories(_) => EntityTag::Categories,
        }
    }

    /// Decode the `data` member of a response envelope for `tag`.
    pub fn decode(tag: EntityTag, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match tag {
            EntityTag::Expenses => CachedData::Expenses(serde_json::from_value(value)?),
            EntityTag::ExpensesSummary => CachedData::Summary(serde_json::from_value(value)?),
            EntityTag::Pots => CachedData::Pots(serde_json::from_value(value)?),
            EntityTag::AiAnalysis => CachedData::Analysis(serde_json::from_value(value)?),
            EntityTag::Categories => CachedData::Categories(serde_json::from_value(value)?),
        })
    }
}

/// Typed view over [`CachedData`].
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn from_cached(data: &CachedData) -> Option<Self>;
    fn into_cached(self) -> CachedData;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn from_cached(data: &CachedData) -> Option<Self> {
                match data {
                    CachedData::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }

            fn into_cached(self) -> CachedData {
                CachedData::$variant(self)
            }
        }
    };
}

cacheable!(Vec<Expense>, Expenses);
cacheable!(ExpenseSummary, Summary);
cacheable!(Vec<Pot>, Pots);
cacheable!(AiAnalysis, Analysis);
cacheable!(Vec<Category>, Categories);

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_by_tag() {
        let data = CachedData::decode(
            EntityTag::Categories,
            json!([{"id": "c1", "name": "Food", "user_id": null}]),
        )
        .expect("categories");
        assert_eq!(data.tag(), EntityTag::Categories);
        let categories = Vec::<Category>::from_cached(&data).expect("typed view");
        assert_eq!(categories[0].name, "Food");
    }

    #[test]
    fn typed_view_rejects_other_variants() {
        let data = CachedData::Pots(Vec::new());
        assert!(Vec::<Expense>::from_cached(&data).is_none());
        assert!(Vec::<Pot>::from_cached(&data).is_some());
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        assert!(CachedData::decode(EntityTag::Pots, json!({"not": "a list"})).is_err());
    }
}
