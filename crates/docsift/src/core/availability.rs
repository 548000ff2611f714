//! One-time probe of the external engines.
//!
//! Run once at startup; the resulting [`EngineAvailability`] is injected into the
//! orchestrator so documents never re-probe.

use crate::core::config::ExtractionConfig;
use crate::extraction::libreoffice::LibreOfficeConverter;
use crate::ocr::render::PdfiumRenderer;
use crate::ocr::tesseract::TesseractCli;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which optional engines this process can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineAvailability {
    pub converter: bool,
    pub ocr: bool,
    /// pdfium could be bound; without it only images can be OCR'd.
    pub pdf_renderer: bool,
}

impl EngineAvailability {
    pub fn all() -> Self {
        Self {
            converter: true,
            ocr: true,
            pdf_renderer: true,
        }
    }

    pub fn none() -> Self {
        Self {
            converter: false,
            ocr: false,
            pdf_renderer: false,
        }
    }

    pub fn can_ocr_pdf(&self) -> bool {
        self.ocr && self.pdf_renderer
    }

    pub async fn probe(config: &ExtractionConfig) -> Self {
        ProbeReport::run(config).await.availability()
    }
}

/// Outcome of probing one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Why it is unavailable, or `None` when it works.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DependencyStatus {
    fn found(path: Option<PathBuf>) -> Self {
        Self {
            available: true,
            path,
            detail: None,
        }
    }

    fn missing(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            path: None,
            detail: Some(detail.into()),
        }
    }
}

/// Detailed probe results, used by the CLI `probe` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub converter: DependencyStatus,
    pub ocr: DependencyStatus,
    pub pdf_renderer: DependencyStatus,
}

impl ProbeReport {
    pub async fn run(config: &ExtractionConfig) -> Self {
        let converter = if !config.converter.enabled {
            DependencyStatus::missing("disabled in configuration")
        } else {
            match LibreOfficeConverter::from_config(&config.converter).check_available().await {
                Ok(path) => DependencyStatus::found(Some(path)),
                Err(e) => DependencyStatus::missing(e.to_string()),
            }
        };

        let ocr = if !config.ocr.enabled {
            DependencyStatus::missing("disabled in configuration")
        } else {
            match TesseractCli::from_config(&config.ocr).probe(&config.ocr.languages).await {
                Ok(path) => DependencyStatus::found(Some(path)),
                Err(e) => DependencyStatus::missing(e.to_string()),
            }
        };

        let pdf_renderer = match tokio::task::spawn_blocking(|| PdfiumRenderer::new().is_available()).await {
            Ok(true) => DependencyStatus::found(None),
            Ok(false) => DependencyStatus::missing("pdfium library could not be loaded"),
            Err(e) => DependencyStatus::missing(format!("pdfium probe panicked: {}", e)),
        };

        let report = Self {
            converter,
            ocr,
            pdf_renderer,
        };

        tracing::info!(
            converter = report.converter.available,
            ocr = report.ocr.available,
            pdf_renderer = report.pdf_renderer.available,
            "Engine availability probed"
        );
        for (name, status) in [
            ("converter", &report.converter),
            ("ocr", &report.ocr),
            ("pdf_renderer", &report.pdf_renderer),
        ] {
            if let Some(detail) = &status.detail {
                tracing::warn!("{} unavailable: {}", name, detail);
            }
        }

        report
    }

    pub fn availability(&self) -> EngineAvailability {
        EngineAvailability {
            converter: self.converter.available,
            ocr: self.ocr.available,
            pdf_renderer: self.pdf_renderer.available,
        }
    }
}
