//! Asynchronous extraction tasks.
//!
//! [`TaskManager::submit`] records a pending task and returns at once. A
//! dispatcher hands queued tasks to a bounded pool of workers; each worker owns
//! one task for its whole lifetime and is the only writer of its record.

use crate::core::config::TaskConfig;
use crate::core::orchestrator::ExtractionOrchestrator;
use crate::error::{DocsiftError, Result};
use crate::tasks::documents::DocumentStore;
use crate::tasks::store::TaskStore;
use crate::types::{ExtractionResult, ExtractionTask, TaskId, TaskStatusView};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

struct Shared {
    orchestrator: Arc<ExtractionOrchestrator>,
    documents: Arc<dyn DocumentStore>,
    store: Arc<dyn TaskStore>,
}

pub struct TaskManager {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<TaskId>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    workers: usize,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("workers", &self.workers)
            .field("accepting", &self.queue.lock().is_some())
            .finish()
    }
}

impl TaskManager {
    /// Start the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        config: &TaskConfig,
        orchestrator: Arc<ExtractionOrchestrator>,
        documents: Arc<dyn DocumentStore>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let workers = config.workers.max(1);
        let shared = Arc::new(Shared {
            orchestrator,
            documents,
            store,
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), receiver, workers));

        tracing::info!("Task manager started with {} workers", workers);

        Self {
            shared,
            queue: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            workers,
        }
    }

    /// Queue extraction of a document and return the new task id.
    ///
    /// # Errors
    ///
    /// - `DuplicateActiveTask` if the document already has a pending or processing task
    /// - `Validation` for an empty id
    /// - `Other` after [`shutdown`](Self::shutdown)
    pub fn submit(&self, document_id: &str) -> Result<TaskId> {
        if document_id.trim().is_empty() {
            return Err(DocsiftError::validation("Document id must not be empty"));
        }

        let sender = self
            .queue
            .lock()
            .clone()
            .ok_or_else(|| DocsiftError::Other("Task manager is shut down".to_string()))?;

        let task = self.shared.store.insert_if_no_active(ExtractionTask::new(document_id))?;

        if sender.send(task.task_id.clone()).is_err() {
            self.shared
                .store
                .fail(&task.task_id, "Task manager stopped before the task could run")?;
            return Err(DocsiftError::Other("Task manager is shut down".to_string()));
        }

        tracing::info!(task_id = %task.task_id, document_id, "Extraction task queued");
        Ok(task.task_id)
    }

    /// Full task record.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for an unknown id.
    pub fn get_status(&self, task_id: &str) -> Result<ExtractionTask> {
        self.shared
            .store
            .get(task_id)?
            .ok_or_else(|| DocsiftError::TaskNotFound(task_id.to_string()))
    }

    /// Latest task for the document, if any was ever submitted.
    pub fn get_status_by_document(&self, document_id: &str) -> Result<Option<ExtractionTask>> {
        self.shared.store.latest_for_document(document_id)
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<TaskStatusView> {
        Ok(self.get_status(task_id)?.view())
    }

    pub fn get_document_extraction_status(&self, document_id: &str) -> Result<Option<TaskStatusView>> {
        Ok(self.get_status_by_document(document_id)?.map(|task| task.view()))
    }

    /// Result of a completed task; `None` until then.
    pub fn get_result(&self, task_id: &str) -> Result<Option<ExtractionResult>> {
        self.shared.store.result(task_id)
    }

    /// Poll until the task is terminal.
    pub async fn wait_until_terminal(&self, task_id: &str, poll_interval: Duration) -> Result<ExtractionTask> {
        loop {
            let task = self.get_status(task_id)?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stop accepting submissions and wait for queued and running tasks to finish.
    pub async fn shutdown(&self) {
        drop(self.queue.lock().take());

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!("Task dispatcher terminated abnormally: {}", e);
            }
            tracing::info!("Task manager shut down");
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<TaskId>, workers: usize) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    while let Some(task_id) = queue.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let shared = Arc::clone(&shared);
        running.spawn(async move {
            let _permit = permit;
            run_guarded(shared, task_id).await;
        });

        while running.try_join_next().is_some() {}
    }

    while running.join_next().await.is_some() {}
}

/// Run the worker in its own task so a panic fails the task instead of leaving it processing.
async fn run_guarded(shared: Arc<Shared>, task_id: TaskId) {
    let worker = tokio::spawn(process(Arc::clone(&shared), task_id.clone()));
    if let Err(e) = worker.await {
        tracing::error!(task_id = %task_id, "Extraction worker panicked: {}", e);
        if let Err(store_err) = shared
            .store
            .fail(&task_id, &format!("Extraction worker panicked: {}", e))
        {
            tracing::error!(task_id = %task_id, "Could not record worker failure: {}", store_err);
        }
    }
}

#[tracing::instrument(skip(shared), fields(document_id = tracing::field::Empty))]
async fn process(shared: Arc<Shared>, task_id: TaskId) {
    let task = match shared.store.mark_processing(&task_id) {
        Ok(task) => task,
        Err(e @ (DocsiftError::InvalidTransition { .. } | DocsiftError::TaskNotFound(_))) => {
            tracing::warn!("Task could not be started: {}", e);
            return;
        }
        Err(e) => {
            tracing::error!("Task could not be started: {}", e);
            log_outcome(shared.store.fail(&task_id, &format!("Task could not be started: {}", e)));
            return;
        }
    };
    tracing::Span::current().record("document_id", task.document_id.as_str());
    tracing::info!("Extraction started");

    let outcome = match execute(&shared, &task).await {
        Ok(result) => shared.store.complete(&task_id, result).or_else(|e| {
            tracing::error!(kind = e.kind(), "Extraction result could not be stored: {}", e);
            shared
                .store
                .fail(&task_id, &format!("Extraction result could not be stored: {}", e))
        }),
        Err(e) => {
            tracing::warn!(kind = e.kind(), "Extraction failed: {}", e);
            shared.store.fail(&task_id, &e.to_string())
        }
    };

    log_outcome(outcome);
}

fn log_outcome(outcome: Result<ExtractionTask>) {
    match outcome {
        Ok(task) => tracing::info!(status = %task.status, "Extraction finished"),
        Err(e) => tracing::error!("Task record could not be finalized: {}", e),
    }
}

async fn execute(shared: &Shared, task: &ExtractionTask) -> Result<ExtractionResult> {
    let document = shared.documents.get_document_path(&task.document_id).await?;

    let store = Arc::clone(&shared.store);
    let task_id = task.task_id.clone();
    let progress = move |value: u8| {
        if let Err(e) = store.set_progress(&task_id, value) {
            tracing::warn!("Progress update for {} dropped: {}", task_id, e);
        }
    };

    let result = shared.orchestrator.extract(&document, &progress).await?;
    shared
        .documents
        .store_extracted_content(&task.document_id, &result)
        .await?;
    Ok(result)
}
