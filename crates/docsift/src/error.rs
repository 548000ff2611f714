//! Error types for docsift.
//!
//! All fallible operations return [`DocsiftError`] through the crate-wide
//! [`Result`] alias.
//!
//! # Error Handling Philosophy
//!
//! **System errors always bubble up unchanged:**
//! - `DocsiftError::Io` (from `std::io::Error`) is never wrapped into another variant.
//!
//! **Stage errors are named after the condition they describe:**
//! - Input errors (`UnsupportedFormat`) are terminal for a document.
//! - Dependency errors (`ConverterUnavailable`, `OcrEngineUnavailable`) are terminal for
//!   the stage that needs the dependency; the orchestrator still tries other paths.
//! - Transient errors (`ConversionTimeout`, `OcrTimeout`, `PageRenderFailed`) are
//!   localized to one stage or one page.
//!
//! # Example
//!
//! ```rust
//! use docsift::{DocsiftError, Result};
//!
//! fn read_document(path: &str) -> Result<Vec<u8>> {
//!     let bytes = std::fs::read(path)?;
//!     if bytes.is_empty() {
//!         return Err(DocsiftError::validation(format!("Document is empty: {}", path)));
//!     }
//!     Ok(bytes)
//! }
//! ```
use thiserror::Error;

/// Result type alias using `DocsiftError`.
pub type Result<T> = std::result::Result<T, DocsiftError>;

/// Main error type for all docsift operations.
#[derive(Debug, Error)]
pub enum DocsiftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parsing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Native extraction failed: {0}")]
    NativeExtractionFailed(String),

    #[error("Office converter unavailable: {0}")]
    ConverterUnavailable(String),

    #[error("Office conversion timed out after {seconds} seconds")]
    ConversionTimeout { seconds: u64 },

    #[error("OCR engine unavailable: {0}")]
    OcrEngineUnavailable(String),

    #[error("OCR timed out on page {page} after {seconds} seconds")]
    OcrTimeout { page: usize, seconds: u64 },

    #[error("Rendering page {page} failed: {message}")]
    PageRenderFailed { page: usize, message: String },

    #[error("Document '{document_id}' already has an active extraction task ({task_id})")]
    DuplicateActiveTask { document_id: String, task_id: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition { task_id: String, from: String, to: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

impl From<calamine::Error> for DocsiftError {
    fn from(err: calamine::Error) -> Self {
        DocsiftError::Parsing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for DocsiftError {
    fn from(err: serde_json::Error) -> Self {
        DocsiftError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::encode::Error> for DocsiftError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DocsiftError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::decode::Error> for DocsiftError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DocsiftError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl DocsiftError {
    error_constructor!(parsing, Parsing);
    error_constructor!(ocr, Ocr);
    error_constructor!(validation, Validation);
    error_constructor!(serialization, Serialization);

    /// Short stable label for logs and task error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Parsing { .. } => "parsing",
            Self::Ocr { .. } => "ocr",
            Self::Validation { .. } => "validation",
            Self::Serialization { .. } => "serialization",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::NativeExtractionFailed(_) => "native_extraction_failed",
            Self::ConverterUnavailable(_) => "converter_unavailable",
            Self::ConversionTimeout { .. } => "conversion_timeout",
            Self::OcrEngineUnavailable(_) => "ocr_engine_unavailable",
            Self::OcrTimeout { .. } => "ocr_timeout",
            Self::PageRenderFailed { .. } => "page_render_failed",
            Self::DuplicateActiveTask { .. } => "duplicate_active_task",
            Self::TaskNotFound(_) => "task_not_found",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::LockPoisoned(_) => "lock_poisoned",
            Self::Other(_) => "other",
        }
    }

    /// Input errors that make a document permanently unprocessable.
    pub fn is_fatal_for_document(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_) | Self::DocumentNotFound(_))
    }

    /// Faults isolated to one stage or one page.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConversionTimeout { .. } | Self::OcrTimeout { .. } | Self::PageRenderFailed { .. }
        )
    }

    /// Missing external dependency (converter, OCR engine, language data, rasterizer).
    pub fn is_missing_dependency(&self) -> bool {
        matches!(self, Self::ConverterUnavailable(_) | Self::OcrEngineUnavailable(_))
    }
}
