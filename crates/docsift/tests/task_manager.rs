mod helpers;

use docsift::tasks::{FileTaskStore, InMemoryDocumentStore, InMemoryTaskStore, TaskManager, TaskStore};
use docsift::{DocsiftError, DocumentRef, EngineAvailability, ResultSource, TaskStatus};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

struct Fixture {
    _dir: tempfile::TempDir,
    documents: Arc<InMemoryDocumentStore>,
    ocr: Arc<CountingOcr>,
    manager: TaskManager,
}

fn fixture_with(ocr: Arc<CountingOcr>, converter: Arc<FakeConverter>, availability: EngineAvailability) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let documents = Arc::new(InMemoryDocumentStore::new());
    documents.insert(DocumentRef::new(
        "clean",
        write_fake_pdf(dir.path(), "clean.pdf", CLEAN_TEXT),
    ));
    documents.insert(DocumentRef::new("scan", write_fake_pdf(dir.path(), "scan.pdf", "")));
    documents.insert(DocumentRef::new(
        "garbled",
        write_fake_pdf(dir.path(), "garbled.pdf", GARBLED_TEXT),
    ));
    let docx = dir.path().join("contract.docx");
    std::fs::write(&docx, b"placeholder").unwrap();
    documents.insert(DocumentRef::new("contract", docx));

    let config = test_config();
    let tasks = config.tasks.clone();
    let h = harness(config, availability, ocr.clone(), converter);

    let manager = TaskManager::start(
        &tasks,
        Arc::new(h.orchestrator),
        documents.clone(),
        Arc::new(InMemoryTaskStore::new()),
    );

    Fixture {
        _dir: dir,
        documents,
        ocr,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(CLEAN_TEXT.to_string())),
        EngineAvailability::all(),
    )
}

#[tokio::test]
async fn test_clean_document_completes_without_ocr() {
    let f = fixture();
    let task_id = f.manager.submit("clean").unwrap();

    let task = tokio::time::timeout(Duration::from_secs(5), f.manager.wait_until_terminal(&task_id, POLL))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.error.is_none());
    assert!(task.started_at.is_some() && task.completed_at.is_some());

    let result = f.manager.get_result(&task_id).unwrap().unwrap();
    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(f.documents.content("clean").unwrap(), result);
    assert_eq!(f.ocr.calls(), 0);
}

#[tokio::test]
async fn test_scanned_document_completes_from_ocr() {
    let f = fixture();
    let task_id = f.manager.submit("scan").unwrap();

    let task = f.manager.wait_until_terminal(&task_id, POLL).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let view = f.manager.get_task_status(&task_id).unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.progress, 100);
    assert_eq!(f.manager.get_result(&task_id).unwrap().unwrap().source, ResultSource::Ocr);
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected_while_active() {
    let f = fixture_with(
        CountingOcr::slow(OCR_TEXT, Duration::from_millis(200)),
        FakeConverter::new(ConverterBehavior::Unavailable),
        EngineAvailability::all(),
    );

    let first = f.manager.submit("garbled").unwrap();
    let err = f.manager.submit("garbled").unwrap_err();
    match err {
        DocsiftError::DuplicateActiveTask { document_id, task_id } => {
            assert_eq!(document_id, "garbled");
            assert_eq!(task_id, first);
        }
        other => panic!("expected DuplicateActiveTask, got {:?}", other),
    }

    let task = f.manager.wait_until_terminal(&first, POLL).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(f.manager.get_result(&first).unwrap().unwrap().source, ResultSource::Ocr);

    // Allowed again once the first task is terminal
    let second = f.manager.submit("garbled").unwrap();
    assert_ne!(first, second);
    f.manager.wait_until_terminal(&second, POLL).await.unwrap();
}

#[tokio::test]
async fn test_docx_without_converter_fails_with_reason() {
    let f = fixture_with(
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(CLEAN_TEXT.to_string())),
        EngineAvailability {
            converter: false,
            ..EngineAvailability::all()
        },
    );

    let task_id = f.manager.submit("contract").unwrap();
    let task = f.manager.wait_until_terminal(&task_id, POLL).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert!(error.to_lowercase().contains("converter"), "unexpected error: {}", error);
    assert!(f.manager.get_result(&task_id).unwrap().is_none());
    assert!(f.documents.content("contract").is_none());
    assert_eq!(f.ocr.calls(), 0);
}

#[tokio::test]
async fn test_unknown_document_fails_task() {
    let f = fixture();
    let task_id = f.manager.submit("missing-doc").unwrap();
    let task = f.manager.wait_until_terminal(&task_id, POLL).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("missing-doc"));
}

#[tokio::test]
async fn test_status_queries() {
    let f = fixture();
    assert!(f.manager.get_document_extraction_status("clean").unwrap().is_none());
    assert!(matches!(
        f.manager.get_task_status("nope"),
        Err(DocsiftError::TaskNotFound(_))
    ));
    assert!(matches!(f.manager.submit("  "), Err(DocsiftError::Validation { .. })));

    let task_id = f.manager.submit("clean").unwrap();
    f.manager.wait_until_terminal(&task_id, POLL).await.unwrap();

    let by_document = f.manager.get_status_by_document("clean").unwrap().unwrap();
    assert_eq!(by_document.task_id, task_id);
    let view = f.manager.get_document_extraction_status("clean").unwrap().unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_drains_queue_and_rejects_new_work() {
    let f = fixture();
    let ids: Vec<_> = ["clean", "scan", "garbled"]
        .iter()
        .map(|doc| f.manager.submit(doc).unwrap())
        .collect();

    f.manager.shutdown().await;

    for id in &ids {
        assert!(f.manager.get_status(id).unwrap().status.is_terminal());
    }
    assert!(matches!(f.manager.submit("contract"), Err(DocsiftError::Other(_))));
}

#[tokio::test]
async fn test_file_store_keeps_results_across_restarts() {
    let store_dir = tempfile::tempdir().unwrap();
    let f = fixture();

    let store: Arc<dyn TaskStore> = Arc::new(FileTaskStore::open(store_dir.path()).unwrap());
    let config = test_config();
    let h = default_harness();
    let manager = TaskManager::start(&config.tasks, Arc::new(h.orchestrator), f.documents.clone(), store);

    let task_id = manager.submit("clean").unwrap();
    manager.wait_until_terminal(&task_id, POLL).await.unwrap();
    manager.shutdown().await;

    let reopened = FileTaskStore::open(store_dir.path()).unwrap();
    assert_eq!(reopened.get(&task_id).unwrap().unwrap().status, TaskStatus::Completed);
    assert_eq!(reopened.result(&task_id).unwrap().unwrap().final_text, CLEAN_TEXT);
}

#[tokio::test]
async fn test_unstorable_result_fails_task_and_frees_document() {
    let store_dir = tempfile::tempdir().unwrap();
    let f = fixture();

    let store: Arc<dyn TaskStore> = Arc::new(FileTaskStore::open(store_dir.path()).unwrap());
    let results_dir = store_dir.path().join("results");
    std::fs::remove_dir_all(&results_dir).unwrap();
    std::fs::write(&results_dir, b"not a directory").unwrap();

    let config = test_config();
    let h = default_harness();
    let manager = TaskManager::start(&config.tasks, Arc::new(h.orchestrator), f.documents.clone(), store);

    let task_id = manager.submit("clean").unwrap();
    let task = tokio::time::timeout(Duration::from_secs(5), manager.wait_until_terminal(&task_id, POLL))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert!(error.contains("could not be stored"), "unexpected error: {}", error);
    assert!(manager.get_result(&task_id).unwrap().is_none());

    let retry = manager.submit("clean").unwrap();
    assert_ne!(retry, task_id);
    manager.shutdown().await;
}
