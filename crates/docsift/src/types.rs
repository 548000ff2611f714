use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier of a document owned by the external document store.
pub type DocumentId = String;

/// Identifier of one extraction task.
pub type TaskId = String;

/// Read-only view of a document as handed out by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub path: PathBuf,
    /// Declared file type, usually the upload's extension (`"pdf"`, `".docx"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            declared_type: None,
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }
}

/// Strategy used by a single extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    NativeText,
    OfficeConverted,
    Ocr,
}

impl ExtractionStrategy {
    pub fn source(self) -> ResultSource {
        match self {
            Self::NativeText => ResultSource::Native,
            Self::OfficeConverted => ResultSource::Converted,
            Self::Ocr => ResultSource::Ocr,
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NativeText => write!(f, "native_text"),
            Self::OfficeConverted => write!(f, "office_converted"),
            Self::Ocr => write!(f, "ocr"),
        }
    }
}

/// Which strategy produced the final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Native,
    Converted,
    Ocr,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Converted => write!(f, "converted"),
            Self::Ocr => write!(f, "ocr"),
        }
    }
}

/// One strategy's output, kept only while the orchestrator decides whether to escalate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionAttempt {
    pub strategy: ExtractionStrategy,
    pub raw_text: String,
    pub garbled_ratio: f64,
    pub is_garbled: bool,
    /// Text too short for the detector to be trusted.
    pub inconclusive: bool,
}

impl ExtractionAttempt {
    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
    }

    /// Non-empty, not garbled and long enough to trust.
    pub fn is_clean(&self) -> bool {
        !self.is_empty() && !self.is_garbled && !self.inconclusive
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            strategy: self.strategy,
            garbled_ratio: self.garbled_ratio,
            is_garbled: self.is_garbled,
            char_count: self.raw_text.chars().count(),
        }
    }
}

/// Compact audit record of an attempt, persisted with the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub strategy: ExtractionStrategy,
    pub garbled_ratio: f64,
    pub is_garbled: bool,
    pub char_count: usize,
}

/// Final text plus provenance for one document.
///
/// Written once, when the owning task reaches `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub document_id: DocumentId,
    pub final_text: String,
    pub source: ResultSource,
    /// Garbled ratio of the winning attempt; 0.0 is clean text, 1.0 is pure noise.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    /// Zero-based pages whose rendering or recognition failed or timed out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<usize>,
    /// Encoding used to decode plain-text input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub attempts: Vec<AttemptSummary>,
}

/// Lifecycle of an extraction task.
///
/// Status only moves forward: `pending -> processing -> {completed | failed}`.
/// A pending task may also fail directly (e.g. the document vanished before a worker picked it up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted record of one extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTask {
    pub task_id: TaskId,
    pub document_id: DocumentId,
    pub status: TaskStatus,
    /// 0..=100, never decreases.
    pub progress: u8,
    /// Unix timestamps in milliseconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

impl ExtractionTask {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            created_at: unix_millis(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn view(&self) -> TaskStatusView {
        TaskStatusView {
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// What pollers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
