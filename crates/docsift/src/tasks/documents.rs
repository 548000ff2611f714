//! Boundary to the system that owns documents.

use crate::error::{DocsiftError, Result};
use crate::types::{DocumentId, DocumentRef, ExtractionResult};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Where documents come from and where extracted content goes.
///
/// Implemented by the host application (database, object storage, ...).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Resolve a document to a readable file.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` when the id is unknown.
    async fn get_document_path(&self, document_id: &str) -> Result<DocumentRef>;

    /// Persist the final text of a document. Called once per completed task,
    /// before the task is reported as completed.
    async fn store_extracted_content(&self, document_id: &str, result: &ExtractionResult) -> Result<()>;
}

/// Map-backed [`DocumentStore`] for the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<AHashMap<DocumentId, DocumentRef>>,
    content: RwLock<AHashMap<DocumentId, ExtractionResult>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: DocumentRef) {
        self.documents.write().insert(document.id.clone(), document);
    }

    pub fn remove(&self, document_id: &str) -> Option<DocumentRef> {
        self.documents.write().remove(document_id)
    }

    /// Last content stored for the document.
    pub fn content(&self, document_id: &str) -> Option<ExtractionResult> {
        self.content.read().get(document_id).cloned()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document_path(&self, document_id: &str) -> Result<DocumentRef> {
        self.documents
            .read()
            .get(document_id)
            .cloned()
            .ok_or_else(|| DocsiftError::DocumentNotFound(document_id.to_string()))
    }

    async fn store_extracted_content(&self, document_id: &str, result: &ExtractionResult) -> Result<()> {
        self.content.write().insert(document_id.to_string(), result.clone());
        Ok(())
    }
}
