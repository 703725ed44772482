use std::sync::Arc;

use fedplane_model::{Condition, ListOptions, Task, TaskId, TaskPage};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{DocumentStore, Index};
use crate::error::CoreError;

pub const TASK_TABLE: &str = "federation_task";

const FIELD_TASK_ID: &str = "taskID";

/// Durable storage of task documents keyed by `taskID`.
pub struct TaskStore {
    db: Arc<dyn DocumentStore>,
    table_ready: RwLock<bool>,
}

impl TaskStore {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self {
            db,
            table_ready: RwLock::new(false),
        }
    }

    fn indexes() -> Vec<Index> {
        vec![
            Index::new("idx_task_id", &[FIELD_TASK_ID], true),
            Index::new("idx_task_index_type", &["taskIndex", "taskType"], false),
        ]
    }

    /// Create the table and its indexes at most once per store.
    ///
    /// Concurrent callers wait on the write lock; only the first one talks to the database.
    async fn ensure_table(&self) -> Result<(), CoreError> {
        if *self.table_ready.read().await {
            return Ok(());
        }

        let mut ready = self.table_ready.write().await;
        if *ready {
            return Ok(());
        }
        if !self.db.has_table(TASK_TABLE).await? {
            self.db.create_table(TASK_TABLE, &Self::indexes()).await?;
            debug!(table = TASK_TABLE, "task table created");
        }
        *ready = true;
        Ok(())
    }

    fn by_id(task_id: &TaskId) -> Condition {
        Condition::eq(FIELD_TASK_ID, task_id.as_str())
    }

    fn to_fields(task: &Task) -> Result<Map<String, Value>, CoreError> {
        match serde_json::to_value(task)? {
            Value::Object(map) => Ok(map),
            _ => Err(CoreError::Store("task did not serialize to an object".into())),
        }
    }

    #[instrument(level = "debug", skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    pub async fn create_task(&self, task: &Task) -> Result<(), CoreError> {
        if task.task_id.is_empty() || task.step_sequence.is_empty() {
            return Err(CoreError::Validation("task is empty".into()));
        }
        self.ensure_table().await?;
        self.db
            .insert(TASK_TABLE, Value::Object(Self::to_fields(task)?))
            .await
    }

    /// Replace the whole document with `task`.
    ///
    /// Every field is written, so a partially filled `Task` erases what it leaves at default.
    /// Callers read, modify, then write back; use [`TaskStore::patch_task`] for field updates.
    #[instrument(level = "debug", skip(self, task), fields(task_id = %task.task_id))]
    pub async fn update_task(&self, task: &Task) -> Result<(), CoreError> {
        if task.task_id.is_empty() {
            return Err(CoreError::Validation("task id is empty".into()));
        }
        self.ensure_table().await?;
        self.db
            .set_fields(
                TASK_TABLE,
                &Self::by_id(&task.task_id),
                Self::to_fields(task)?,
                true,
            )
            .await?;
        Ok(())
    }

    /// `$set` only the given document fields; dotted keys reach into steps.
    #[instrument(level = "debug", skip(self, fields), fields(task_id = %task_id))]
    pub async fn patch_task(
        &self,
        task_id: &TaskId,
        fields: Map<String, Value>,
    ) -> Result<(), CoreError> {
        if fields.contains_key(FIELD_TASK_ID) {
            return Err(CoreError::Validation("taskID is immutable".into()));
        }
        self.ensure_table().await?;
        let matched = self
            .db
            .set_fields(TASK_TABLE, &Self::by_id(task_id), fields, false)
            .await?;
        if matched == 0 {
            return Err(CoreError::not_found("task", task_id.as_str()));
        }
        Ok(())
    }

    /// Like [`TaskStore::patch_task`], but only when the document also matches `guard`.
    ///
    /// Returns `false` when the task exists and `guard` rejected it.
    #[instrument(level = "debug", skip(self, guard, fields), fields(task_id = %task_id))]
    pub async fn patch_task_if(
        &self,
        task_id: &TaskId,
        guard: Condition,
        fields: Map<String, Value>,
    ) -> Result<bool, CoreError> {
        if fields.contains_key(FIELD_TASK_ID) {
            return Err(CoreError::Validation("taskID is immutable".into()));
        }
        self.ensure_table().await?;
        let matched = self
            .db
            .set_fields(TASK_TABLE, &Self::by_id(task_id).and(guard), fields, false)
            .await?;
        if matched > 0 {
            return Ok(true);
        }
        self.get_task(task_id).await?;
        Ok(false)
    }

    pub async fn delete_task(&self, task_id: &TaskId) -> Result<(), CoreError> {
        self.ensure_table().await?;
        let deleted = self.db.delete(TASK_TABLE, &Self::by_id(task_id)).await?;
        if deleted == 0 {
            return Err(CoreError::not_found("task", task_id.as_str()));
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        self.ensure_table().await?;
        let docs = self
            .db
            .find(
                TASK_TABLE,
                &Self::by_id(task_id),
                &ListOptions::new().with_limit(1),
            )
            .await?;
        let doc = docs
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found("task", task_id.as_str()))?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Filtered, sorted, bounded listing. Never pages past the effective limit.
    #[instrument(level = "debug", skip(self, cond, opts))]
    pub async fn list_task(
        &self,
        cond: &Condition,
        opts: &ListOptions,
    ) -> Result<TaskPage<Task>, CoreError> {
        self.ensure_table().await?;
        let total = self.db.count(TASK_TABLE, cond).await?;
        if opts.count {
            return Ok(TaskPage {
                items: Vec::new(),
                total,
            });
        }

        let docs = self.db.find(TASK_TABLE, cond, opts).await?;
        let mut items = docs
            .into_iter()
            .take(opts.effective_limit())
            .map(serde_json::from_value::<Task>)
            .collect::<Result<Vec<_>, _>>()?;
        if opts.skip_decrypt {
            items = items.iter().map(Task::masked).collect();
        }
        Ok(TaskPage { items, total })
    }
}

#[cfg(test)]
mod tests {
    use fedplane_model::{DEFAULT_TASK_LIST_LENGTH, MASKED_VALUE, SortOrder, Step, TaskStatus};
    use serde_json::json;

    use super::*;
    use crate::store::MemoryDocumentStore;

    fn task(index: &str, task_type: &str) -> Task {
        let mut t = Task::new(task_type, "test");
        t.task_index = index.to_string();
        t.push_step(Step::new("s1", "step one"));
        t.push_step(Step::new("s2", "step two"));
        t
    }

    fn store() -> (MemoryDocumentStore, TaskStore) {
        let db = MemoryDocumentStore::new();
        let store = TaskStore::new(Arc::new(db.clone()));
        (db, store)
    }

    #[tokio::test]
    async fn create_then_get() {
        let (_, store) = store();
        let t = task("c1", "InstallFederation");
        store.create_task(&t).await.unwrap();

        let back = store.get_task(&t.task_id).await.unwrap();
        assert_eq!(back, t);
    }

    #[tokio::test]
    async fn create_rejects_empty_task() {
        let (_, store) = store();
        let err = store.create_task(&Task::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn table_is_created_once_under_concurrency() {
        let (db, store) = store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create_task(&task(&format!("c{i}"), "t")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(db.create_table_calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_task_id_conflicts() {
        let (_, store) = store();
        let t = task("c1", "t");
        store.create_task(&t).await.unwrap();
        assert!(store.create_task(&t).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_, store) = store();
        let err = store.get_task(&TaskId::from("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_replaces_whole_document() {
        let (_, store) = store();
        let mut t = task("c1", "t");
        t.message = "hello".into();
        store.create_task(&t).await.unwrap();

        // A partial object wipes what it leaves at default.
        let partial = Task {
            task_id: t.task_id.clone(),
            task_type: "t".into(),
            ..Default::default()
        };
        store.update_task(&partial).await.unwrap();

        let back = store.get_task(&t.task_id).await.unwrap();
        assert!(back.message.is_empty());
        assert!(back.step_sequence.is_empty());
    }

    #[tokio::test]
    async fn patch_touches_only_given_fields() {
        let (_, store) = store();
        let mut t = task("c1", "t");
        t.message = "keep me".into();
        store.create_task(&t).await.unwrap();

        let fields = json!({"status": "Running", "steps.s1.status": "Running"});
        store
            .patch_task(&t.task_id, fields.as_object().cloned().unwrap())
            .await
            .unwrap();

        let back = store.get_task(&t.task_id).await.unwrap();
        assert_eq!(back.status, TaskStatus::Running);
        assert_eq!(back.step("s1").unwrap().status, TaskStatus::Running);
        assert_eq!(back.message, "keep me");
    }

    #[tokio::test]
    async fn patch_cannot_change_task_id() {
        let (_, store) = store();
        let t = task("c1", "t");
        store.create_task(&t).await.unwrap();

        let fields = json!({"taskID": "other"});
        let err = store
            .patch_task(&t.task_id, fields.as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_, store) = store();
        let t = task("c1", "t");
        store.create_task(&t).await.unwrap();
        store.delete_task(&t.task_id).await.unwrap();
        assert!(store.get_task(&t.task_id).await.unwrap_err().is_not_found());
        assert!(store.delete_task(&t.task_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_filters_sorts_and_bounds() {
        let (_, store) = store();
        for i in 0..5 {
            let mut t = task(&format!("c{i}"), "InstallFederation");
            t.start = format!("2024-01-0{}T00:00:00Z", i + 1);
            store.create_task(&t).await.unwrap();
        }
        store.create_task(&task("x", "RemoveSubCluster")).await.unwrap();

        let cond = Condition::eq("taskType", "InstallFederation");
        let opts = ListOptions::new()
            .sort_by("start", SortOrder::Desc)
            .with_offset(1)
            .with_limit(2);
        let page = store.list_task(&cond, &opts).await.unwrap();

        assert_eq!(page.total, 5);
        let idx: Vec<_> = page.items.iter().map(|t| t.task_index.as_str()).collect();
        assert_eq!(idx, vec!["c3", "c2"]);
    }

    #[tokio::test]
    async fn list_count_only_returns_no_items() {
        let (_, store) = store();
        store.create_task(&task("a", "t")).await.unwrap();
        store.create_task(&task("b", "t")).await.unwrap();

        let page = store
            .list_task(&Condition::all(), &ListOptions::new().count_only())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn list_skip_decrypt_masks_tokens() {
        let (_, store) = store();
        let mut t = task("a", "t");
        t.common_params.insert("userToken".into(), "secret".into());
        store.create_task(&t).await.unwrap();

        let page = store
            .list_task(&Condition::all(), &ListOptions::new().with_skip_decrypt())
            .await
            .unwrap();
        assert_eq!(page.items[0].param("userToken"), Some(MASKED_VALUE));
    }

    #[tokio::test]
    async fn list_status_in_condition() {
        let (_, store) = store();
        let mut running = task("a", "t");
        running.status = TaskStatus::Running;
        let mut done = task("b", "t");
        done.status = TaskStatus::Success;
        store.create_task(&running).await.unwrap();
        store.create_task(&done).await.unwrap();

        let cond = Condition::is_in("status", ["Init", "Running", "NotStarted", "ForceTerminate"]);
        let page = store.list_task(&cond, &ListOptions::new()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].task_index, "a");
    }

    #[tokio::test]
    async fn update_on_fresh_store_creates_indexed_table() {
        let (db, store) = store();
        let t = task("c1", "t");
        store.update_task(&t).await.unwrap();
        assert_eq!(db.create_table_calls(), 1);

        // The unique taskID index is in place, so a second insert of the same id clashes.
        assert!(store.create_task(&t).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn patch_on_fresh_store_is_not_found() {
        let (db, store) = store();
        let fields = json!({"status": "Running"}).as_object().cloned().unwrap();
        let err = store
            .patch_task(&TaskId::from("nope"), fields)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(db.has_table(TASK_TABLE).await.unwrap());
    }

    #[tokio::test]
    async fn patch_if_respects_guard() {
        let (_, store) = store();
        let mut t = task("c1", "t");
        t.status = TaskStatus::Success;
        store.create_task(&t).await.unwrap();

        let guard = Condition::is_in("status", ["Init", "Running"]);
        let fields = json!({"status": "ForceTerminate"}).as_object().cloned().unwrap();
        let applied = store
            .patch_task_if(&t.task_id, guard.clone(), fields.clone())
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(store.get_task(&t.task_id).await.unwrap().status, TaskStatus::Success);

        let err = store
            .patch_task_if(&TaskId::from("nope"), guard, fields)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_without_limit_caps_at_default_length() {
        let (_, store) = store();
        for i in 0..=DEFAULT_TASK_LIST_LENGTH {
            store.create_task(&task(&format!("c{i}"), "t")).await.unwrap();
        }

        let page = store
            .list_task(&Condition::all(), &ListOptions::new().with_limit(0))
            .await
            .unwrap();
        assert_eq!(page.total, DEFAULT_TASK_LIST_LENGTH + 1);
        assert_eq!(page.items.len(), DEFAULT_TASK_LIST_LENGTH);
    }
}
