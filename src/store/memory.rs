use super::{compare_values, Direction, Query, Store, StoreRow};
use crate::error::{IntakeError, Result};
use crate::schema::RecordId;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Store kept entirely in memory, keyed by table name. Ids are v4 UUIDs.
///
/// Write failures can be injected per table so callers can observe how the
/// pipeline behaves when the store gives out halfway through.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, Vec<StoreRow>>>,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Table -> rows that may still be inserted before inserts start failing.
    insert_budget: HashMap<String, usize>,
    failing_deletes: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert into `table` fails from now on.
    pub fn fail_inserts(&self, table: &str) {
        self.fail_inserts_after(table, 0);
    }

    /// Inserts into `table` succeed for `rows` more rows, then fail.
    pub fn fail_inserts_after(&self, table: &str, rows: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert_budget.insert(table.to_string(), rows);
        }
    }

    pub fn fail_deletes(&self, table: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_deletes.insert(table.to_string());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    /// Copy of every row currently in `table`.
    pub fn rows(&self, table: &str) -> Vec<StoreRow> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    fn lock_tables(&self, table: &str) -> Result<MutexGuard<'_, BTreeMap<String, Vec<StoreRow>>>> {
        self.tables
            .lock()
            .map_err(|_| IntakeError::store_write(table, "memory store lock poisoned"))
    }

    fn reserve_inserts(&self, table: &str, rows: usize) -> Result<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| IntakeError::store_write(table, "memory store lock poisoned"))?;

        if let Some(budget) = faults.insert_budget.get_mut(table) {
            if *budget < rows {
                return Err(IntakeError::store_write(table, "injected insert failure"));
            }
            *budget -= rows;
        }
        Ok(())
    }

    fn check_delete(&self, table: &str) -> Result<()> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| IntakeError::store_write(table, "memory store lock poisoned"))?;

        if faults.failing_deletes.contains(table) {
            return Err(IntakeError::store_write(table, "injected delete failure"));
        }
        Ok(())
    }
}

fn assign_id(mut row: StoreRow) -> (RecordId, StoreRow) {
    let id = RecordId(Uuid::new_v4().to_string());
    row.insert("id".to_string(), Value::String(id.0.clone()));
    (id, row)
}

fn sort_rows(rows: &mut [StoreRow], field: &str, direction: Direction) {
    rows.sort_by(|a, b| {
        let left = a.get(field).unwrap_or(&Value::Null);
        let right = b.get(field).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
        };
        match direction {
            Direction::Ascending => ordering,
            // Rows without the field stay last either way.
            Direction::Descending if left.is_null() || right.is_null() => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, table: &str, row: StoreRow) -> Result<RecordId> {
        self.reserve_inserts(table, 1)?;
        let (id, row) = assign_id(row);
        self.lock_tables(table)?
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(id)
    }

    async fn insert_many(&self, table: &str, rows: Vec<StoreRow>) -> Result<Vec<RecordId>> {
        self.reserve_inserts(table, rows.len())?;
        let mut tables = self.lock_tables(table)?;
        let target = tables.entry(table.to_string()).or_default();

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, row) = assign_id(row);
            target.push(row);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<StoreRow>> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| IntakeError::store_read(table, "memory store lock poisoned"))?;

        let mut rows: Vec<StoreRow> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some((field, direction)) = &query.order_by {
            sort_rows(&mut rows, field, *direction);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn update(&self, table: &str, id: &RecordId, changes: StoreRow) -> Result<()> {
        let mut tables = self.lock_tables(table)?;
        let row = tables
            .get_mut(table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").and_then(Value::as_str) == Some(id.as_str()))
            })
            .ok_or_else(|| IntakeError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        for (key, value) in changes {
            if key != "id" {
                row.insert(key, value);
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<usize> {
        self.check_delete(table)?;
        let mut tables = self.lock_tables(table)?;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> StoreRow {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_select_filters() {
        let store = MemoryStore::new();
        let first = store
            .insert("sales", row(json!({"date": "2024-01-05", "total": 10.0})))
            .await
            .unwrap();
        store
            .insert_many(
                "sales",
                vec![
                    row(json!({"date": "2024-02-01", "total": 20.0})),
                    row(json!({"date": "2024-01-20", "total": 30.0})),
                ],
            )
            .await
            .unwrap();

        let january = store
            .select(
                "sales",
                &Query::new()
                    .between("date", "2024-01-01", "2024-01-31")
                    .order_by("date", Direction::Descending),
            )
            .await
            .unwrap();

        assert_eq!(january.len(), 2);
        assert_eq!(january[0]["total"], json!(30.0));
        assert_eq!(january[1]["id"], json!(first.as_str()));
        assert_eq!(store.count("sales", &Query::new()).await.unwrap(), 3);
        assert!(store.select("missing", &Query::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = MemoryStore::new();
        let id = store
            .insert("uploads", row(json!({"status": "processed"})))
            .await
            .unwrap();

        store
            .update("uploads", &id, row(json!({"status": "deleted", "id": "forged"})))
            .await
            .unwrap();
        let rows = store.rows("uploads");
        assert_eq!(rows[0]["status"], json!("deleted"));
        assert_eq!(rows[0]["id"], json!(id.as_str()));

        let missing = store
            .update("uploads", &RecordId::from("nope"), StoreRow::new())
            .await;
        assert!(matches!(missing, Err(IntakeError::NotFound { .. })));

        let removed = store
            .delete("uploads", &Query::new().eq("id", id.as_str()))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len("uploads"), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_inserts_after("leads", 1);

        assert!(store.insert("leads", StoreRow::new()).await.is_ok());
        let err = store.insert("leads", StoreRow::new()).await.unwrap_err();
        assert!(matches!(err, IntakeError::StoreWrite { .. }));

        store.fail_deletes("leads");
        assert!(store.delete("leads", &Query::new()).await.is_err());

        store.clear_faults();
        assert_eq!(store.delete("leads", &Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_limit_and_ascending_order() {
        let store = MemoryStore::new();
        for month in [3, 1, 2] {
            store
                .insert("quotas", row(json!({"month": month})))
                .await
                .unwrap();
        }

        let rows = store
            .select(
                "quotas",
                &Query::new().order_by("month", Direction::Ascending).limit(2),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["month"], json!(1));
        assert_eq!(rows[1]["month"], json!(2));
    }
}
