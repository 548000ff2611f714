//! Pipeline core: configuration, format detection, engine discovery and the
//! per-document orchestrator.
//!
//! # Example
//!
//! ```rust,no_run
//! use docsift::core::config::ExtractionConfig;
//! use docsift::core::format::sniff_format;
//!
//! # fn example() -> docsift::Result<()> {
//! let config = ExtractionConfig::load()?;
//! let format = sniff_format("report.docx", None)?;
//! println!("{:?} with OCR languages {}", format.category, config.ocr.language_arg());
//! # Ok(())
//! # }
//! ```

pub mod availability;
pub mod binaries;
pub mod config;
pub mod format;
pub mod orchestrator;

pub use availability::{EngineAvailability, ProbeReport};
pub use config::{ConverterConfig, ExtractionConfig, GarbledConfig, OcrConfig, TaskConfig};
pub use format::{FormatCategory, OfficeKind, SniffedFormat, sniff_format};
pub use orchestrator::{ExtractionOrchestrator, NoopProgress, OrchestratorBuilder, ProgressSink};
