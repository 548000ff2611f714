//! docsift - document text extraction with an OCR safety net
//!
//! Pulls text out of PDFs, office documents, spreadsheets, plain text and
//! images. Native text is checked for garbling (broken font encodings, scanned
//! pages with junk text layers); bad or empty output escalates to OCR, and the
//! best attempt wins. Extraction runs as pollable background tasks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use docsift::{ExtractionConfig, ExtractionOrchestrator, TaskManager};
//! use docsift::tasks::{InMemoryDocumentStore, InMemoryTaskStore};
//! use docsift::types::DocumentRef;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> docsift::Result<()> {
//! let config = ExtractionConfig::load()?;
//! let tasks = config.tasks.clone();
//! let orchestrator = Arc::new(ExtractionOrchestrator::from_environment(config).await?);
//!
//! let documents = Arc::new(InMemoryDocumentStore::new());
//! documents.insert(DocumentRef::new("doc-1", "contract.docx"));
//!
//! let manager = TaskManager::start(&tasks, orchestrator, documents, Arc::new(InMemoryTaskStore::new()));
//! let task_id = manager.submit("doc-1")?;
//! let task = manager.wait_until_terminal(&task_id, Duration::from_millis(200)).await?;
//! println!("{} ({}%)", task.status, task.progress);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Core** (`core`): configuration, format sniffing, engine discovery and the orchestrator
//! - **Extraction** (`extraction`): native PDF/spreadsheet/text readers and the office converter
//! - **Text** (`text`): garbled-text detection
//! - **OCR** (`ocr`): page rendering, preprocessing and Tesseract
//! - **Tasks** (`tasks`): task state machine, persistence and the worker pool

#![cfg_attr(not(test), deny(unsafe_code))]

pub mod core;
pub mod error;
pub mod extraction;
pub mod ocr;
pub mod tasks;
pub mod text;
pub mod types;

pub use error::{DocsiftError, Result};

pub use types::*;

pub use core::availability::{EngineAvailability, ProbeReport};
pub use core::config::{ConverterConfig, ExtractionConfig, GarbledConfig, OcrConfig, TaskConfig};
pub use core::format::{FormatCategory, OfficeKind, SniffedFormat, sniff_format};
pub use core::orchestrator::{ExtractionOrchestrator, NoopProgress, OrchestratorBuilder, ProgressSink};

pub use tasks::{DocumentStore, FileTaskStore, InMemoryDocumentStore, InMemoryTaskStore, TaskManager, TaskStore};
pub use text::garbled::{GarbledTextDetector, GarbledVerdict};
