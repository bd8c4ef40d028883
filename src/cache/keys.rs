//! Query key definitions.
//!
//! A [`QueryKey`] identifies one cached server result: the entity tag it
//! belongs to plus a normalized parameter set. Two requests that ask for the
//! same thing (regardless of the order their parameters were supplied in)
//! produce equal keys.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The record group a cached result belongs to.
///
/// Invalidation always works on whole tags, so related-but-distinct groups
/// (such as monthly summaries versus expense lists) get their own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityTag {
    /// Paginated, filtered expense lists.
    Expenses,
    /// Monthly spending summary.
    ExpensesSummary,
    /// Savings goals.
    Pots,
    /// AI spending insight.
    AiAnalysis,
    /// Expense categories.
    Categories,
}

impl EntityTag {
    pub const ALL: [EntityTag; 5] = [
        EntityTag::Expenses,
        EntityTag::ExpensesSummary,
        EntityTag::Pots,
        EntityTag::AiAnalysis,
        EntityTag::Categories,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityTag::Expenses => "expenses",
            EntityTag::ExpensesSummary => "expenses.summary",
            EntityTag::Pots => "pots",
            EntityTag::AiAnalysis => "ai.analysis",
            EntityTag::Categories => "categories",
        }
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value.
///
/// Numbers and booleans keep their type so `"10"` and `10` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<u8> for ParamValue {
    fn from(value: u8) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

/// Normalized, order-independent request parameters.
///
/// String values are trimmed and dropped when empty, so an untouched search
/// box and an absent search parameter produce the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryParams(BTreeMap<String, ParamValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let name = name.into();
        match value.into() {
            ParamValue::Str(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    self.0.remove(&name);
                } else {
                    self.0.insert(name, ParamValue::Str(trimmed.to_string()));
                }
            }
            other => {
                self.0.insert(name, other);
            }
        }
        self
    }

    /// Insert when `value` is present; `None` removes the parameter.
    pub fn insert_opt<V: Into<ParamValue>>(
        &mut self,
        name: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        let name = name.into();
        match value {
            Some(value) => self.insert(name, value),
            None => {
                self.0.remove(&name);
                self
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stringified pairs in key order, ready for a URL query string.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Conversion from a typed parameter struct into normalized parameters.
pub trait IntoQueryParams {
    fn to_query_params(&self) -> QueryParams;
}

impl IntoQueryParams for QueryParams {
    fn to_query_params(&self) -> QueryParams {
        self.clone()
    }
}

impl IntoQueryParams for () {
    fn to_query_params(&self) -> QueryParams {
        QueryParams::new()
    }
}

/// Identity of one cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    tag: EntityTag,
    params: QueryParams,
}

impl QueryKey {
    pub fn new(tag: EntityTag, params: QueryParams) -> Self {
        Self { tag, params }
    }

    /// Key for an entity that takes no parameters.
    pub fn bare(tag: EntityTag) -> Self {
        Self::new(tag, QueryParams::new())
    }

    pub fn tag(&self) -> EntityTag {
        self.tag
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Short stable fingerprint for log correlation.
    pub fn fingerprint(&self) -> u64 {
        hash_value(self)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag.as_str())?;
        for (index, (name, value)) in self.params.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(f, "{separator}{name}={value}")?;
        }
        Ok(())
    }
}

/// Build the key for `tag` from any typed parameter struct.
pub fn build_key(tag: EntityTag, params: &impl IntoQueryParams) -> QueryKey {
    QueryKey::new(tag, params.to_query_params())
}

/// Compute a hash for any hashable value.
fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
