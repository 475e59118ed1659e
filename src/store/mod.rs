//! The relational store the pipeline writes to and the KPIs read from.
//!
//! The crate never talks to a database directly. Everything goes through
//! [`Store`], a small table-oriented surface (insert, select with filters,
//! update by id, delete by filter) that an embedder backs with whatever
//! engine it uses. [`MemoryStore`] is the in-process implementation.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::{IntakeError, Result};
use crate::schema::{RecordId, Stored};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub type StoreRow = Map<String, Value>;

pub mod tables {
    pub const EVENTS: &str = "events";
    pub const EVENT_SALES: &str = "event_sales";
    pub const EVENT_EXPENSES: &str = "event_expenses";
    pub const SUBSCRIPTION_PLANS: &str = "subscription_plans";
    pub const SUBSCRIBERS: &str = "subscribers";
    pub const PAYMENTS: &str = "subscription_payments";
    pub const UNLOCKS: &str = "unlocks";
    pub const INVENTORY_SALES: &str = "subscriber_inventory_sales";
    pub const CAMPAIGNS: &str = "campaigns";
    pub const LEADS: &str = "leads";
    pub const ONLINE_SALES: &str = "online_sales";
    pub const MONTHLY_QUOTAS: &str = "monthly_quotas";
    pub const UPLOADED_FILES: &str = "uploaded_files";
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
}

impl Filter {
    pub fn matches(&self, row: &StoreRow) -> bool {
        let field_value = |field: &str| row.get(field).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(field, expected) => values_equal(field_value(field), expected),
            Filter::Neq(field, expected) => !values_equal(field_value(field), expected),
            Filter::Gte(field, bound) => matches!(
                compare_values(field_value(field), bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lte(field, bound) => matches!(
                compare_values(field_value(field), bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn neq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(field.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(field.to_string(), value.into()));
        self
    }

    /// Inclusive range on a field.
    pub fn between(self, field: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        self.gte(field, from).lte(field, to)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &StoreRow) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Numbers compare numerically, everything else structurally.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering for range filters and sorting. Null and mixed types are
/// incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// The persistence collaborator.
///
/// Implementations are expected to be consistent per call but need not offer
/// transactions; the commit pipeline compensates on its own.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, table: &str, row: StoreRow) -> Result<RecordId>;

    async fn insert_many(&self, table: &str, rows: Vec<StoreRow>) -> Result<Vec<RecordId>>;

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<StoreRow>>;

    async fn count(&self, table: &str, query: &Query) -> Result<usize> {
        Ok(self.select(table, query).await?.len())
    }

    async fn update(&self, table: &str, id: &RecordId, changes: StoreRow) -> Result<()>;

    /// Removes every row matching the query and returns how many went.
    async fn delete(&self, table: &str, query: &Query) -> Result<usize>;
}

pub fn to_row<T: Serialize>(record: &T) -> Result<StoreRow> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(IntakeError::Parse(format!(
            "expected a record object, got {}",
            other
        ))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: StoreRow) -> Result<Stored<T>> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Typed select.
pub async fn fetch<T, S>(store: &S, table: &str, query: &Query) -> Result<Vec<Stored<T>>>
where
    T: DeserializeOwned,
    S: Store + ?Sized,
{
    store
        .select(table, query)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

pub async fn fetch_by_id<T, S>(store: &S, table: &str, id: &RecordId) -> Result<Stored<T>>
where
    T: DeserializeOwned,
    S: Store + ?Sized,
{
    let query = Query::new().eq("id", id.as_str()).limit(1);
    fetch(store, table, &query)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| IntakeError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })
}

/// Sums one numeric column over the rows matching a query.
pub async fn sum_column<S>(store: &S, table: &str, column: &str, query: &Query) -> Result<f64>
where
    S: Store + ?Sized,
{
    let rows = store.select(table, query).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_f64))
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> StoreRow {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_range_filters_on_dates_and_numbers() {
        let r = row(json!({"date": "2024-03-15", "total": 120.0, "status": "paid"}));

        assert!(Query::new().between("date", "2024-03-01", "2024-03-31").matches(&r));
        assert!(!Query::new().between("date", "2024-04-01", "2024-04-30").matches(&r));
        assert!(Query::new().gte("total", 120).matches(&r));
        assert!(!Query::new().lte("total", 100).matches(&r));
        assert!(Query::new().eq("status", "paid").neq("status", "pending").matches(&r));
    }

    #[test]
    fn test_missing_fields_never_satisfy_ranges() {
        let r = row(json!({"date": null}));
        assert!(!Query::new().gte("date", "2024-01-01").matches(&r));
        assert!(!Query::new().lte("missing", 5).matches(&r));
        assert!(Query::new().neq("status", "deleted").matches(&r));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert!(values_equal(&json!(3), &json!(3.0)));
        assert!(!values_equal(&json!("3"), &json!(3)));
    }
}
