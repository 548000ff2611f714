//! Task and result persistence.
//!
//! Stores enforce the task invariants so callers cannot break them:
//! - at most one non-terminal task per document (checked and inserted atomically)
//! - status only moves forward (`pending -> processing -> completed | failed`)
//! - progress never decreases and only reaches 100 on completion
//! - a result exists exactly for completed tasks
//! - terminal records are never modified again

use crate::core::config::TaskConfig;
use crate::error::{DocsiftError, Result};
use crate::types::{DocumentId, ExtractionResult, ExtractionTask, TaskId, TaskStatus, unix_millis};
use ahash::AHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const TASK_DIR: &str = "tasks";
const RESULT_DIR: &str = "results";
const INTERRUPTED_ERROR: &str = "Extraction interrupted: the process stopped before the task finished";

pub trait TaskStore: Send + Sync {
    /// Insert a new pending task unless the document already has a non-terminal one.
    ///
    /// # Errors
    ///
    /// `DuplicateActiveTask` naming the task already in flight.
    fn insert_if_no_active(&self, task: ExtractionTask) -> Result<ExtractionTask>;

    fn get(&self, task_id: &str) -> Result<Option<ExtractionTask>>;

    /// Most recently created task for the document.
    fn latest_for_document(&self, document_id: &str) -> Result<Option<ExtractionTask>>;

    fn mark_processing(&self, task_id: &str) -> Result<ExtractionTask>;

    /// Raise progress; lower values and updates to terminal tasks are ignored.
    fn set_progress(&self, task_id: &str, progress: u8) -> Result<()>;

    fn complete(&self, task_id: &str, result: ExtractionResult) -> Result<ExtractionTask>;

    fn fail(&self, task_id: &str, error: &str) -> Result<ExtractionTask>;

    fn result(&self, task_id: &str) -> Result<Option<ExtractionResult>>;
}

/// Table entries a single task change can touch, captured so the change can be undone.
#[derive(Debug)]
struct Checkpoint {
    task_id: TaskId,
    document_id: Option<DocumentId>,
    task: Option<ExtractionTask>,
    active: Option<TaskId>,
    latest: Option<TaskId>,
    had_result: bool,
}

#[derive(Debug, Default)]
struct TaskTable {
    tasks: AHashMap<TaskId, ExtractionTask>,
    results: AHashMap<TaskId, ExtractionResult>,
    active: AHashMap<DocumentId, TaskId>,
    latest: AHashMap<DocumentId, TaskId>,
}

impl TaskTable {
    fn insert(&mut self, task: ExtractionTask) -> Result<ExtractionTask> {
        if let Some(active_id) = self.active.get(&task.document_id) {
            return Err(DocsiftError::DuplicateActiveTask {
                document_id: task.document_id.clone(),
                task_id: active_id.clone(),
            });
        }
        if task.status != TaskStatus::Pending {
            return Err(DocsiftError::validation(format!(
                "New task {} must be pending, not {}",
                task.task_id, task.status
            )));
        }

        self.active.insert(task.document_id.clone(), task.task_id.clone());
        self.latest.insert(task.document_id.clone(), task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    /// Restore a persisted record as is.
    fn restore(&mut self, task: ExtractionTask) {
        let newer = self
            .latest
            .get(&task.document_id)
            .and_then(|id| self.tasks.get(id))
            .is_none_or(|current| task.created_at >= current.created_at);
        if newer {
            self.latest.insert(task.document_id.clone(), task.task_id.clone());
        }
        if !task.status.is_terminal() {
            self.active.insert(task.document_id.clone(), task.task_id.clone());
        }
        self.tasks.insert(task.task_id.clone(), task);
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut ExtractionTask> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| DocsiftError::TaskNotFound(task_id.to_string()))
    }

    fn check_transition(&self, task_id: &str, next: TaskStatus) -> Result<()> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DocsiftError::TaskNotFound(task_id.to_string()))?;
        if !task.status.can_transition_to(next) {
            return Err(DocsiftError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, task_id: &str, next: TaskStatus) -> Result<&mut ExtractionTask> {
        self.check_transition(task_id, next)?;
        let task = self.task_mut(task_id)?;
        task.status = next;
        Ok(task)
    }

    /// `document_id` is only needed for tasks not in the table yet.
    fn checkpoint(&self, task_id: &str, document_id: Option<&str>) -> Checkpoint {
        let task = self.tasks.get(task_id).cloned();
        let document_id = document_id
            .map(str::to_string)
            .or_else(|| task.as_ref().map(|t| t.document_id.clone()));
        let active = document_id.as_ref().and_then(|d| self.active.get(d).cloned());
        let latest = document_id.as_ref().and_then(|d| self.latest.get(d).cloned());

        Checkpoint {
            task_id: task_id.to_string(),
            document_id,
            task,
            active,
            latest,
            had_result: self.results.contains_key(task_id),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint {
            task_id,
            document_id,
            task,
            active,
            latest,
            had_result,
        } = checkpoint;

        match task {
            Some(task) => {
                self.tasks.insert(task_id.clone(), task);
            }
            None => {
                self.tasks.remove(&task_id);
            }
        }
        if !had_result {
            self.results.remove(&task_id);
        }
        if let Some(document_id) = document_id {
            restore_entry(&mut self.active, document_id.clone(), active);
            restore_entry(&mut self.latest, document_id, latest);
        }
    }

    fn mark_processing(&mut self, task_id: &str) -> Result<ExtractionTask> {
        let task = self.transition(task_id, TaskStatus::Processing)?;
        task.started_at = Some(unix_millis());
        Ok(task.clone())
    }

    fn set_progress(&mut self, task_id: &str, progress: u8) -> Result<Option<ExtractionTask>> {
        let task = self.task_mut(task_id)?;
        if task.status.is_terminal() {
            return Ok(None);
        }
        let capped = progress.min(99);
        if capped <= task.progress {
            return Ok(None);
        }
        task.progress = capped;
        Ok(Some(task.clone()))
    }

    fn complete(&mut self, task_id: &str, result: ExtractionResult) -> Result<ExtractionTask> {
        let task = self.transition(task_id, TaskStatus::Completed)?;
        task.progress = 100;
        task.completed_at = Some(unix_millis());
        task.error = None;
        let task = task.clone();

        self.active.remove(&task.document_id);
        self.results.insert(task.task_id.clone(), result);
        Ok(task)
    }

    fn fail(&mut self, task_id: &str, error: &str) -> Result<ExtractionTask> {
        let task = self.transition(task_id, TaskStatus::Failed)?;
        task.completed_at = Some(unix_millis());
        task.error = Some(error.to_string());
        let task = task.clone();

        self.active.remove(&task.document_id);
        Ok(task)
    }

    fn latest_for_document(&self, document_id: &str) -> Option<ExtractionTask> {
        self.latest
            .get(document_id)
            .and_then(|task_id| self.tasks.get(task_id))
            .cloned()
    }
}

fn restore_entry(map: &mut AHashMap<DocumentId, TaskId>, document_id: DocumentId, previous: Option<TaskId>) {
    match previous {
        Some(task_id) => {
            map.insert(document_id, task_id);
        }
        None => {
            map.remove(&document_id);
        }
    }
}

/// Process-local [`TaskStore`]; the default.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    table: RwLock<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&TaskTable) -> T) -> Result<T> {
        let table = self
            .table
            .read()
            .map_err(|e| DocsiftError::LockPoisoned(format!("Task table lock poisoned: {}", e)))?;
        Ok(f(&table))
    }

    fn write<T>(&self, f: impl FnOnce(&mut TaskTable) -> Result<T>) -> Result<T> {
        let mut table = self
            .table
            .write()
            .map_err(|e| DocsiftError::LockPoisoned(format!("Task table lock poisoned: {}", e)))?;
        f(&mut table)
    }
}

impl TaskStore for InMemoryTaskStore {
    fn insert_if_no_active(&self, task: ExtractionTask) -> Result<ExtractionTask> {
        self.write(|table| table.insert(task))
    }

    fn get(&self, task_id: &str) -> Result<Option<ExtractionTask>> {
        self.read(|table| table.tasks.get(task_id).cloned())
    }

    fn latest_for_document(&self, document_id: &str) -> Result<Option<ExtractionTask>> {
        self.read(|table| table.latest_for_document(document_id))
    }

    fn mark_processing(&self, task_id: &str) -> Result<ExtractionTask> {
        self.write(|table| table.mark_processing(task_id))
    }

    fn set_progress(&self, task_id: &str, progress: u8) -> Result<()> {
        self.write(|table| table.set_progress(task_id, progress).map(|_| ()))
    }

    fn complete(&self, task_id: &str, result: ExtractionResult) -> Result<ExtractionTask> {
        self.write(|table| table.complete(task_id, result))
    }

    fn fail(&self, task_id: &str, error: &str) -> Result<ExtractionTask> {
        self.write(|table| table.fail(task_id, error))
    }

    fn result(&self, task_id: &str) -> Result<Option<ExtractionResult>> {
        self.read(|table| table.results.get(task_id).cloned())
    }
}

/// [`TaskStore`] that mirrors every record to MessagePack files under a directory.
///
/// Layout: `<dir>/tasks/<task_id>.msgpack` and `<dir>/results/<task_id>.msgpack`.
/// Files are written to a temporary name and renamed into place. On open, tasks
/// that were still pending or processing are failed as interrupted.
#[derive(Debug)]
pub struct FileTaskStore {
    dir: PathBuf,
    memory: InMemoryTaskStore,
}

impl FileTaskStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(TASK_DIR))?;
        fs::create_dir_all(dir.join(RESULT_DIR))?;

        let store = Self {
            dir,
            memory: InMemoryTaskStore::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reload(&self) -> Result<()> {
        let tasks: Vec<ExtractionTask> = read_records(&self.dir.join(TASK_DIR))?;

        let mut interrupted = Vec::new();
        self.memory.write(|table| {
            for task in tasks {
                if !task.status.is_terminal() {
                    interrupted.push(task.task_id.clone());
                }
                table.restore(task);
            }

            for task_id in table
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| t.task_id.clone())
                .collect::<Vec<_>>()
            {
                let path = record_path(&self.dir.join(RESULT_DIR), &task_id);
                match read_record::<ExtractionResult>(&path) {
                    Ok(result) => {
                        table.results.insert(task_id, result);
                    }
                    Err(e) => tracing::warn!("Result of completed task {} could not be loaded: {}", task_id, e),
                }
            }
            Ok(())
        })?;

        for task_id in interrupted {
            tracing::warn!("Task {} was interrupted by a restart; marking it failed", task_id);
            let task = self.memory.fail(&task_id, INTERRUPTED_ERROR)?;
            self.persist_task(&task)?;
        }

        Ok(())
    }

    fn persist_task(&self, task: &ExtractionTask) -> Result<()> {
        write_record(&self.dir.join(TASK_DIR), &task.task_id, task)
    }

    /// Apply `change` and write the task record it returns, all under the table
    /// lock. When the write fails the table is rolled back, so memory never holds
    /// a state the disk does not.
    fn commit(
        &self,
        task_id: &str,
        document_id: Option<&str>,
        change: impl FnOnce(&mut TaskTable) -> Result<Option<ExtractionTask>>,
    ) -> Result<Option<ExtractionTask>> {
        self.memory.write(|table| {
            let checkpoint = table.checkpoint(task_id, document_id);
            let Some(task) = change(table)? else {
                return Ok(None);
            };
            if let Err(e) = self.persist_task(&task) {
                table.rollback(checkpoint);
                return Err(e);
            }
            Ok(Some(task))
        })
    }
}

fn committed(task: Option<ExtractionTask>, task_id: &str) -> Result<ExtractionTask> {
    task.ok_or_else(|| DocsiftError::TaskNotFound(task_id.to_string()))
}

impl TaskStore for FileTaskStore {
    fn insert_if_no_active(&self, task: ExtractionTask) -> Result<ExtractionTask> {
        let task_id = task.task_id.clone();
        let document_id = task.document_id.clone();
        let inserted = self.commit(&task_id, Some(&document_id), |table| table.insert(task).map(Some))?;
        committed(inserted, &task_id)
    }

    fn get(&self, task_id: &str) -> Result<Option<ExtractionTask>> {
        self.memory.get(task_id)
    }

    fn latest_for_document(&self, document_id: &str) -> Result<Option<ExtractionTask>> {
        self.memory.latest_for_document(document_id)
    }

    fn mark_processing(&self, task_id: &str) -> Result<ExtractionTask> {
        let task = self.commit(task_id, None, |table| table.mark_processing(task_id).map(Some))?;
        committed(task, task_id)
    }

    fn set_progress(&self, task_id: &str, progress: u8) -> Result<()> {
        self.commit(task_id, None, |table| table.set_progress(task_id, progress))?;
        Ok(())
    }

    fn complete(&self, task_id: &str, result: ExtractionResult) -> Result<ExtractionTask> {
        let result_dir = self.dir.join(RESULT_DIR);
        let mut result_written = false;
        let task = self.commit(task_id, None, |table| {
            table.check_transition(task_id, TaskStatus::Completed)?;
            // Result goes to disk before the status says it exists
            write_record(&result_dir, task_id, &result)?;
            result_written = true;
            table.complete(task_id, result).map(Some)
        });
        if task.is_err() && result_written {
            let _ = fs::remove_file(record_path(&result_dir, task_id));
        }
        committed(task?, task_id)
    }

    /// A failure always sticks in memory. If its record cannot be written, the
    /// record on disk stays non-terminal and is failed as interrupted on the
    /// next open.
    fn fail(&self, task_id: &str, error: &str) -> Result<ExtractionTask> {
        let task = self.memory.fail(task_id, error)?;
        if let Err(e) = self.persist_task(&task) {
            tracing::error!("Failure of task {} kept in memory only: {}", task_id, e);
        }
        Ok(task)
    }

    fn result(&self, task_id: &str) -> Result<Option<ExtractionResult>> {
        self.memory.result(task_id)
    }
}

/// Store selected by configuration: on disk when `store_dir` is set, in memory otherwise.
pub fn open_store(config: &TaskConfig) -> Result<Arc<dyn TaskStore>> {
    match &config.store_dir {
        Some(dir) => Ok(Arc::new(FileTaskStore::open(dir)?)),
        None => Ok(Arc::new(InMemoryTaskStore::new())),
    }
}

fn record_path(dir: &Path, task_id: &str) -> PathBuf {
    dir.join(format!("{}.msgpack", task_id))
}

fn write_record<T: serde::Serialize>(dir: &Path, task_id: &str, record: &T) -> Result<()> {
    let serialized = rmp_serde::to_vec_named(record)?;

    let pid = std::process::id();
    let thread_id = std::thread::current().id();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_path = dir.join(format!("{}.tmp.{}.{:?}.{}", task_id, pid, thread_id, timestamp));

    fs::write(&temp_path, &serialized)?;
    if let Err(e) = fs::rename(&temp_path, record_path(dir, task_id)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Every readable `*.msgpack` record in `dir`; leftovers from interrupted writes are skipped.
fn read_records<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("msgpack") {
            continue;
        }
        match read_record(&path) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping unreadable task record {}: {}", path.display(), e),
        }
    }
    Ok(records)
}
