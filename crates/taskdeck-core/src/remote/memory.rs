use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{Match, Op, Predicate, Query, RemoteStore, Row};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::task::TaskStatus;

/// In-process stand-in for the hosted store.
///
/// Emulates the `tasks` table: the store assigns `id`, `created_at` and
/// `updated_at`, defaults `status` and `hours_spent`, enforces the `title`
/// not-null and `status` check constraints, and evaluates predicates with SQL
/// null semantics.
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    clock: Arc<dyn Clock>,
    fail_next: Mutex<Option<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            clock,
            fail_next: Mutex::new(None),
        }
    }

    /// Makes the next store call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, Vec::len)
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        match self.fail_next.lock().take() {
            Some(message) => Err(StoreError::new(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    #[instrument(skip(self), fields(table = %query.table))]
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.take_failure()?;
        let tables = self.tables.lock();
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.predicates.iter().all(|p| predicate_holds(row, p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = query.order.as_ref() {
            rows.sort_by(|a, b| {
                order_rows(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                    order.ascending,
                )
            });
        }

        debug!(count = rows.len(), "memory select");
        Ok(rows)
    }

    #[instrument(skip(self, row))]
    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        self.take_failure()?;
        let now = self.clock.now();

        row.insert("id".to_string(), json!(Uuid::new_v4()));
        row.insert("created_at".to_string(), json!(now));
        row.insert("updated_at".to_string(), json!(now));
        for (column, default) in [("status", json!(TaskStatus::Todo)), ("hours_spent", json!(0))] {
            if row.get(column).is_none_or(Value::is_null) {
                row.insert(column.to_string(), default);
            }
        }
        for column in ["description", "due_date"] {
            row.entry(column.to_string()).or_insert(Value::Null);
        }
        check_constraints(&row)?;

        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    #[instrument(skip(self, patch), fields(column = %matcher.column))]
    async fn update(&self, table: &str, matcher: &Match, patch: Row) -> Result<Row, StoreError> {
        self.take_failure()?;
        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        let row = rows
            .iter_mut()
            .find(|row| row.get(&matcher.column) == Some(&matcher.value))
            .ok_or_else(|| StoreError::new("no rows returned for update"))?;

        let mut updated = row.clone();
        for (column, value) in patch {
            if column == "id" || column == "created_at" {
                continue;
            }
            updated.insert(column, value);
        }
        check_constraints(&updated)?;

        *row = updated.clone();
        Ok(updated)
    }

    #[instrument(skip(self), fields(column = %matcher.column))]
    async fn delete(&self, table: &str, matcher: &Match) -> Result<(), StoreError> {
        self.take_failure()?;
        let mut tables = self.tables.lock();
        if let Some(rows) = tables.get_mut(table) {
            let before = rows.len();
            rows.retain(|row| row.get(&matcher.column) != Some(&matcher.value));
            debug!(removed = before - rows.len(), "memory delete");
        }
        Ok(())
    }
}

fn check_constraints(row: &Row) -> Result<(), StoreError> {
    match row.get("title") {
        Some(Value::String(title)) if !title.is_empty() => {}
        _ => {
            return Err(StoreError::new(
                "null value in column \"title\" violates not-null constraint",
            ));
        }
    }

    let status_ok = row
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| TaskStatus::ALL.iter().any(|s| s.as_str() == status));
    if !status_ok {
        return Err(StoreError::new(
            "new row violates check constraint \"tasks_status_check\"",
        ));
    }

    if let Some(hours) = row.get("hours_spent").and_then(Value::as_f64)
        && hours < 0.0
    {
        return Err(StoreError::new(
            "new row violates check constraint \"tasks_hours_spent_check\"",
        ));
    }

    Ok(())
}

fn predicate_holds(row: &Row, predicate: &Predicate) -> bool {
    let value = row.get(&predicate.column).unwrap_or(&Value::Null);
    let Some(ordering) = compare_values(value, &predicate.value) else {
        return false;
    };
    match predicate.op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Gte => ordering != Ordering::Less,
        Op::Lte => ordering != Ordering::Greater,
    }
}

/// Nulls sort last ascending and first descending, as Postgres does.
fn order_rows(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    };
    if ascending { ordering } else { ordering.reverse() }
}

/// `None` when either side is null or the values are not comparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
