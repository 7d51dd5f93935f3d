//! Task-shaped client over the generic [`RemoteStore`] contract.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult, StoreError};
use crate::filter::FilterSpec;
use crate::remote::{Match, Op, Query, RemoteStore, Row};
use crate::task::{NewTask, Task, TaskPatch};

pub const DEFAULT_TABLE: &str = "tasks";

#[derive(Clone)]
pub struct TaskStore {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl TaskStore {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_clock(remote, Arc::new(SystemClock))
    }

    pub fn with_clock(remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            clock,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// The select this client issues for `filter`.
    pub fn build_query(&self, filter: &FilterSpec) -> Query {
        let mut query = Query::select(&self.table);
        if let Some(status) = filter.status.status() {
            query = query.filter("status", Op::Eq, status.as_str());
        }
        if let Some(from) = filter.date_from {
            query = query.filter("due_date", Op::Gte, json!(from));
        }
        if let Some(to) = filter.date_to {
            query = query.filter("due_date", Op::Lte, json!(to));
        }
        query.order_by("created_at", filter.sort_order.ascending())
    }

    #[instrument(skip(self), fields(status = %filter.status, sort = %filter.sort_order))]
    pub async fn list(&self, filter: &FilterSpec) -> CoreResult<Vec<Task>> {
        let query = self.build_query(filter);
        let rows = self.remote.select(&query).await.map_err(|err| {
            error!(error = %err, "failed fetching tasks");
            CoreError::from(err)
        })?;

        let tasks = rows
            .into_iter()
            .map(decode_task)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    #[instrument(skip(self, new_task), fields(title_len = new_task.title.len()))]
    pub async fn create(&self, new_task: &NewTask) -> CoreResult<Task> {
        new_task.validate()?;
        let row = self
            .remote
            .insert(&self.table, new_task.to_row())
            .await
            .map_err(|err| {
                error!(error = %err, "failed creating task");
                CoreError::from(err)
            })?;

        let task = decode_task(row)?;
        info!(task_id = %task.id, "created task");
        Ok(task)
    }

    /// Applies `patch` and always stamps a fresh `updated_at`.
    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub async fn update(&self, id: Uuid, patch: &TaskPatch) -> CoreResult<Task> {
        patch.validate()?;
        let row = patch.to_row(self.clock.now());
        let row = self
            .remote
            .update(&self.table, &id_match(id), row)
            .await
            .map_err(|err| {
                error!(error = %err, "failed updating task");
                CoreError::from(err)
            })?;

        let task = decode_task(row)?;
        info!(status = %task.status, "updated task");
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        self.remote
            .delete(&self.table, &id_match(id))
            .await
            .map_err(|err| {
                error!(error = %err, "failed deleting task");
                CoreError::from(err)
            })?;
        info!("deleted task");
        Ok(())
    }
}

fn id_match(id: Uuid) -> Match {
    Match::eq("id", Value::String(id.to_string()))
}

fn decode_task(row: Row) -> Result<Task, StoreError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| StoreError::new(format!("malformed task record: {err}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::filter::{SortOrder, StatusFilter};
    use crate::remote::MemoryStore;
    use crate::task::TaskStatus;

    fn store() -> TaskStore {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("valid");
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SteppingClock::new(start, Duration::minutes(1)));
        let remote = Arc::new(MemoryStore::new(clock.clone()));
        TaskStore::with_clock(remote, clock)
    }

    #[test]
    fn query_for_default_filter_orders_newest_first() {
        let query = store().build_query(&FilterSpec::default());
        assert!(query.predicates.is_empty());
        let order = query.order.expect("order");
        assert_eq!(order.column, "created_at");
        assert!(!order.ascending);
    }

    #[test]
    fn query_carries_status_and_date_bounds() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().expect("valid");
        let filter = FilterSpec {
            status: StatusFilter::Running,
            date_from: Some(from),
            date_to: None,
            sort_order: SortOrder::Oldest,
        };
        let query = store().build_query(&filter);

        assert_eq!(query.predicates.len(), 2);
        assert_eq!(query.predicates[0].column, "status");
        assert_eq!(query.predicates[0].value, json!("running"));
        assert_eq!(query.predicates[1].op, Op::Gte);
        assert!(query.order.expect("order").ascending);
    }

    #[tokio::test]
    async fn create_validates_before_calling_store() {
        let store = store();
        let err = store.create(&NewTask::titled("")).await.expect_err("blank title");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn update_stamps_fresh_updated_at() {
        let store = store();
        let created = store.create(&NewTask::titled("Draft")).await.expect("create");
        let updated = store
            .update(created.id, &TaskPatch::status(TaskStatus::Running))
            .await
            .expect("update");

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.title, "Draft");
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn update_of_missing_task_is_store_error() {
        let err = store()
            .update(Uuid::new_v4(), &TaskPatch::status(TaskStatus::Done))
            .await
            .expect_err("missing id");
        assert!(matches!(err, CoreError::Store(_)));
    }
}
