//! Owns the in-memory task collection and keeps it in step with the store.
//!
//! A filter change replaces the collection with a fresh fetch. Single-record
//! mutations are reconciled in place without re-fetching, which is only sound
//! for a single active client. Mutations that land while a fetch is in flight
//! are replayed over that fetch's rows when it is applied.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::filter::{FilterPatch, FilterSpec};
use crate::report::{self, Report};
use crate::store::TaskStore;
use crate::task::{NewTask, Task, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The collection was replaced with this many tasks.
    Applied(usize),
    /// A newer fetch was issued while this one was in flight; its result was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message raised after an operation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn info(title: &str, description: &str) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn error(description: String) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error".to_string(),
            description,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Collects notices in memory.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[derive(Debug)]
enum LocalEdit {
    Created(Task),
    Updated(Task),
    Deleted(Uuid),
}

#[derive(Debug)]
struct Collection {
    state: LoadState,
    filter: FilterSpec,
    tasks: Vec<Task>,
    latest_request: u64,
    /// Edits applied while a fetch was outstanding, tagged with the request id
    /// that was latest at the time.
    edits: Vec<(u64, LocalEdit)>,
}

impl Collection {
    fn record(&mut self, edit: LocalEdit) {
        if self.state == LoadState::Loading {
            self.edits.push((self.latest_request, edit));
        }
    }

    /// Installs the rows of fetch `request_id`, replaying the edits made after
    /// it was issued.
    fn apply_fetched(&mut self, request_id: u64, mut tasks: Vec<Task>) -> usize {
        for (seen, edit) in std::mem::take(&mut self.edits) {
            if seen != request_id {
                continue;
            }
            match edit {
                LocalEdit::Created(task) => {
                    if !tasks.iter().any(|t| t.id == task.id) {
                        tasks.insert(0, task);
                    }
                }
                LocalEdit::Updated(task) => {
                    if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id)
                        && slot.updated_at < task.updated_at
                    {
                        *slot = task;
                    }
                }
                LocalEdit::Deleted(id) => tasks.retain(|t| t.id != id),
            }
        }
        self.tasks = tasks;
        self.state = LoadState::Ready;
        self.tasks.len()
    }
}

type EntityLocks = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

/// Held for the duration of one mutation. Dropping it forgets the id's lock
/// once no other mutation holds or waits on it.
struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

pub struct TaskCollectionController {
    store: TaskStore,
    notifier: Arc<dyn Notifier>,
    collection: Mutex<Collection>,
    entity_locks: EntityLocks,
}

impl TaskCollectionController {
    pub fn new(store: TaskStore, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_filter(store, notifier, FilterSpec::default())
    }

    pub fn with_filter(store: TaskStore, notifier: Arc<dyn Notifier>, filter: FilterSpec) -> Self {
        Self {
            store,
            notifier,
            collection: Mutex::new(Collection {
                state: LoadState::Idle,
                filter,
                tasks: vec![],
                latest_request: 0,
                edits: vec![],
            }),
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> LoadState {
        self.collection.lock().state
    }

    pub fn filter(&self) -> FilterSpec {
        self.collection.lock().filter.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.collection.lock().tasks.clone()
    }

    pub fn find(&self, id: Uuid) -> Option<Task> {
        self.collection
            .lock()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    /// Resolves a full id or a unique leading fragment of one.
    pub fn resolve_id(&self, fragment: &str) -> CoreResult<Uuid> {
        if let Ok(id) = Uuid::parse_str(fragment) {
            return Ok(id);
        }
        let needle = fragment.trim().to_ascii_lowercase().replace('-', "");
        if needle.is_empty() {
            return Err(CoreError::validation("task id is empty"));
        }

        let collection = self.collection.lock();
        let mut matches = collection
            .tasks
            .iter()
            .filter(|task| task.id.simple().to_string().starts_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id),
            (Some(_), Some(_)) => Err(CoreError::validation(format!(
                "task id '{fragment}' is ambiguous"
            ))),
            (None, _) => Err(CoreError::validation(format!(
                "no loaded task matches id '{fragment}'"
            ))),
        }
    }

    /// Snapshot report of the current collection.
    pub fn report(&self, generated_at: DateTime<Utc>) -> Report {
        report::generate(&self.collection.lock().tasks, generated_at)
    }

    /// Merges `patch` into the filter and fetches a fresh collection.
    #[instrument(skip(self))]
    pub async fn set_filter(&self, patch: FilterPatch) -> CoreResult<FetchOutcome> {
        {
            let mut collection = self.collection.lock();
            collection.filter = collection.filter.merge(patch);
        }
        self.refresh().await
    }

    /// Fetches the collection for the current filter.
    ///
    /// Every fetch takes a new request id; a response that arrives after a
    /// newer fetch was issued is discarded.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> CoreResult<FetchOutcome> {
        let (request_id, filter) = {
            let mut collection = self.collection.lock();
            collection.latest_request += 1;
            collection.state = LoadState::Loading;
            (collection.latest_request, collection.filter.clone())
        };
        debug!(request_id, "fetching tasks");

        let result = self.store.list(&filter).await;

        let outcome = {
            let mut collection = self.collection.lock();
            if request_id != collection.latest_request {
                debug!(
                    request_id,
                    latest = collection.latest_request,
                    "discarding superseded fetch result"
                );
                return Ok(FetchOutcome::Superseded);
            }
            match result {
                Ok(tasks) => Ok(FetchOutcome::Applied(
                    collection.apply_fetched(request_id, tasks),
                )),
                Err(err) => {
                    collection.edits.clear();
                    collection.state = LoadState::Error;
                    Err(err)
                }
            }
        };

        if let Err(err) = outcome.as_ref() {
            self.raise_failure("Failed to fetch tasks", err);
        }
        outcome
    }

    #[instrument(skip(self, new_task))]
    pub async fn create_task(&self, new_task: NewTask) -> CoreResult<Task> {
        let task = match self.store.create(&new_task).await {
            Ok(task) => task,
            Err(err) => {
                self.raise_failure("Failed to create task", &err);
                return Err(err);
            }
        };

        {
            let mut collection = self.collection.lock();
            // A fetch that completed meanwhile may already hold the record.
            if let Some(slot) = collection.tasks.iter_mut().find(|t| t.id == task.id) {
                *slot = task.clone();
            } else {
                collection.tasks.insert(0, task.clone());
            }
            collection.record(LocalEdit::Created(task.clone()));
        }

        self.notifier.notify(Notice::info(
            "Task Created",
            "Your task has been successfully created.",
        ));
        Ok(task)
    }

    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> CoreResult<Task> {
        let _guard = self.entity_guard(id).await;

        let task = match self.store.update(id, &patch).await {
            Ok(task) => task,
            Err(err) => {
                self.raise_failure("Failed to update task", &err);
                return Err(err);
            }
        };

        let replaced = {
            let mut collection = self.collection.lock();
            let replaced = match collection.tasks.iter_mut().find(|t| t.id == id) {
                Some(slot) => {
                    *slot = task.clone();
                    true
                }
                None => false,
            };
            collection.record(LocalEdit::Updated(task.clone()));
            replaced
        };
        if !replaced {
            debug!("updated task is not in the loaded collection");
        }

        self.notifier.notify(Notice::info(
            "Task Updated",
            "Your task has been successfully updated.",
        ));
        Ok(task)
    }

    /// One-field status update; a no-op when the loaded task already has `status`.
    #[instrument(skip(self), fields(task_id = %id, status = %status))]
    pub async fn set_status(&self, id: Uuid, status: TaskStatus) -> CoreResult<Task> {
        if let Some(task) = self.find(id)
            && task.status == status
        {
            debug!("status unchanged; skipping store call");
            return Ok(task);
        }
        self.update_task(id, TaskPatch::status(status)).await
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn delete_task(&self, id: Uuid) -> CoreResult<()> {
        let _guard = self.entity_guard(id).await;

        if let Err(err) = self.store.delete(id).await {
            self.raise_failure("Failed to delete task", &err);
            return Err(err);
        }

        {
            let mut collection = self.collection.lock();
            collection.tasks.retain(|task| task.id != id);
            collection.record(LocalEdit::Deleted(id));
        }

        self.notifier.notify(Notice::info(
            "Task Deleted",
            "Your task has been successfully deleted.",
        ));
        Ok(())
    }

    /// Serializes mutations that target the same task.
    async fn entity_guard(&self, id: Uuid) -> EntityGuard<'_> {
        let lock = {
            let mut locks = self.entity_locks.lock();
            locks.entry(id).or_default().clone()
        };
        EntityGuard {
            locks: &self.entity_locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn raise_failure(&self, action: &str, err: &CoreError) {
        warn!(action, error = %err, "operation failed");
        let description = match err {
            CoreError::Validation(inner) => format!("{action}: {}", inner.message),
            CoreError::Store(inner) => {
                format!("{action}: {}. Please try again.", inner.message)
            }
        };
        info!(%description, "raising failure notice");
        self.notifier.notify(Notice::error(description));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::clock::{Clock, SteppingClock};
    use crate::filter::StatusFilter;
    use crate::remote::MemoryStore;

    struct Fixture {
        remote: Arc<MemoryStore>,
        notices: Arc<NoticeLog>,
        controller: TaskCollectionController,
    }

    fn fixture() -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("valid");
        let clock: Arc<dyn Clock> = Arc::new(SteppingClock::new(start, Duration::seconds(1)));
        let remote = Arc::new(MemoryStore::new(clock.clone()));
        let notices = Arc::new(NoticeLog::default());
        let store = TaskStore::with_clock(remote.clone(), clock);
        let controller = TaskCollectionController::new(store, notices.clone());
        Fixture {
            remote,
            notices,
            controller,
        }
    }

    #[tokio::test]
    async fn starts_idle_and_becomes_ready_after_fetch() {
        let fx = fixture();
        assert_eq!(fx.controller.state(), LoadState::Idle);

        let outcome = fx.controller.refresh().await.expect("refresh");
        assert_eq!(outcome, FetchOutcome::Applied(0));
        assert_eq!(fx.controller.state(), LoadState::Ready);
    }

    #[tokio::test]
    async fn created_task_is_prepended_once() {
        let fx = fixture();
        fx.controller
            .create_task(NewTask::titled("first"))
            .await
            .expect("create");
        let second = fx
            .controller
            .create_task(NewTask::titled("second"))
            .await
            .expect("create");

        let tasks = fx.controller.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks.iter().filter(|t| t.id == second.id).count(), 1);
    }

    #[tokio::test]
    async fn update_keeps_position_without_resorting() {
        let fx = fixture();
        for title in ["a", "b", "c"] {
            fx.controller.create_task(NewTask::titled(title)).await.expect("create");
        }
        let before = fx.controller.tasks();
        let middle = before[1].clone();

        let updated = fx
            .controller
            .update_task(
                middle.id,
                TaskPatch {
                    title: Some("b2".to_string()),
                    hours_spent: Some(2.5),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("update");

        let after = fx.controller.tasks();
        assert_eq!(after[1].id, middle.id);
        assert_eq!(after[1].title, "b2");
        assert_eq!(after[1].hours_spent, 2.5);
        assert!(updated.updated_at > middle.updated_at);
        assert_eq!(after.iter().filter(|t| t.id == middle.id).count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_preserves_collection_and_notifies() {
        let fx = fixture();
        fx.controller.create_task(NewTask::titled("keep me")).await.expect("create");
        fx.notices.drain();

        fx.remote.fail_next("network unreachable");
        let err = fx
            .controller
            .set_filter(FilterPatch::status(StatusFilter::Done))
            .await
            .expect_err("fetch should fail");

        assert!(matches!(err, CoreError::Store(_)));
        assert_eq!(fx.controller.state(), LoadState::Error);
        assert_eq!(fx.controller.tasks().len(), 1);
        assert_eq!(fx.controller.filter().status, StatusFilter::Done);

        let notices = fx.notices.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].description.contains("network unreachable"));
    }

    #[tokio::test]
    async fn failed_mutations_leave_collection_untouched() {
        let fx = fixture();
        let task = fx.controller.create_task(NewTask::titled("x")).await.expect("create");
        fx.notices.drain();

        fx.remote.fail_next("constraint violated");
        assert!(
            fx.controller
                .update_task(task.id, TaskPatch::status(TaskStatus::Done))
                .await
                .is_err()
        );
        fx.remote.fail_next("timeout");
        assert!(fx.controller.delete_task(task.id).await.is_err());
        assert!(fx.controller.create_task(NewTask::titled("")).await.is_err());

        assert_eq!(fx.controller.tasks(), vec![task]);
        let notices = fx.notices.drain();
        assert_eq!(notices.len(), 3);
        assert!(notices.iter().all(|n| n.level == NoticeLevel::Error));
    }

    #[tokio::test]
    async fn set_status_to_current_value_skips_store() {
        let fx = fixture();
        let task = fx.controller.create_task(NewTask::titled("x")).await.expect("create");

        fx.remote.fail_next("should not be called");
        let same = fx.controller.set_status(task.id, TaskStatus::Todo).await.expect("noop");
        assert_eq!(same, task);

        // The armed failure is still pending, so the next real call trips it.
        assert!(fx.controller.set_status(task.id, TaskStatus::Running).await.is_err());
        let running = fx
            .controller
            .set_status(task.id, TaskStatus::Running)
            .await
            .expect("update");
        assert_eq!(running.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let fx = fixture();
        let task = fx.controller.create_task(NewTask::titled("x")).await.expect("create");
        fx.controller.delete_task(task.id).await.expect("delete");
        assert!(fx.controller.find(task.id).is_none());
        assert_eq!(fx.remote.row_count("tasks"), 0);
    }

    #[tokio::test]
    async fn entity_locks_are_released_after_mutations() {
        let fx = fixture();
        let kept = fx.controller.create_task(NewTask::titled("kept")).await.expect("create");
        let gone = fx.controller.create_task(NewTask::titled("gone")).await.expect("create");

        let (first, second) = tokio::join!(
            fx.controller.set_status(kept.id, TaskStatus::Running),
            fx.controller.update_task(kept.id, TaskPatch::status(TaskStatus::Done)),
        );
        first.expect("start");
        second.expect("finish");
        fx.remote.fail_next("timeout");
        assert!(fx.controller.update_task(gone.id, TaskPatch::status(TaskStatus::Done)).await.is_err());
        fx.controller.delete_task(gone.id).await.expect("delete");

        assert!(fx.controller.entity_locks.lock().is_empty());
        assert_eq!(fx.controller.find(kept.id).expect("kept").status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn resolves_unique_id_prefix() {
        let fx = fixture();
        let task = fx.controller.create_task(NewTask::titled("x")).await.expect("create");
        let prefix = task.short_id();
        assert_eq!(fx.controller.resolve_id(&prefix).expect("resolve"), task.id);
        assert!(fx.controller.resolve_id("zzzz").is_err());
        assert!(fx.controller.resolve_id("").is_err());
    }
}
