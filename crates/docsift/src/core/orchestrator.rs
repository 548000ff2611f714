//! Per-document extraction pipeline.
//!
//! Drives the fallback chain for one document:
//!
//! ```text
//! sniff -> [convert if office] -> native attempt -> garbled check -> [OCR] -> finalize
//! ```
//!
//! Decision rules:
//! - office documents are converted before any native attempt
//! - a non-empty, non-garbled, conclusive attempt finalizes immediately (no OCR)
//! - an empty, garbled or inconclusive attempt escalates to OCR, at most once
//! - when nothing is clean, the non-empty attempt with the lowest garbled ratio wins
//!   (earlier attempts win ties)
//! - the document only fails on input errors or when every applicable strategy
//!   failed or was unavailable
//!
//! # Example
//!
//! ```rust,no_run
//! use docsift::core::config::ExtractionConfig;
//! use docsift::core::orchestrator::{ExtractionOrchestrator, NoopProgress};
//! use docsift::types::DocumentRef;
//!
//! # async fn example() -> docsift::Result<()> {
//! let orchestrator = ExtractionOrchestrator::from_environment(ExtractionConfig::load()?).await?;
//! let document = DocumentRef::new("doc-1", "scan.pdf");
//! let result = orchestrator.extract(&document, &NoopProgress).await?;
//! println!("{} ({}, confidence {:.2})", result.final_text, result.source, result.confidence);
//! # Ok(())
//! # }
//! ```

use crate::core::availability::EngineAvailability;
use crate::core::binaries::ExternalTool;
use crate::core::config::ExtractionConfig;
use crate::core::format::{FormatCategory, OfficeKind, sniff_format};
use crate::error::{DocsiftError, Result};
use crate::extraction::excel::read_workbook_text;
use crate::extraction::libreoffice::{LibreOfficeConverter, OfficeConverter};
use crate::extraction::pdf::{PdfTextChain, extract_pdf_text};
use crate::extraction::text::{charset_from_declared, read_text_file};
use crate::extraction::{NativeExtraction, NativeOutcome};
use crate::ocr::fallback::{OcrFallbackEngine, OcrOutput};
use crate::ocr::render::{PageRenderer, PdfiumRenderer};
use crate::ocr::tesseract::{OcrEngine, TesseractCli};
use crate::text::garbled::GarbledTextDetector;
use crate::types::{DocumentRef, ExtractionAttempt, ExtractionResult, ExtractionStrategy};
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

/// Coarse progress milestones reported while a document is processed.
pub mod milestones {
    pub const STARTED: u8 = 10;
    pub const NATIVE_DONE: u8 = 30;
    pub const OCR_STARTED: u8 = 60;
    pub const OCR_DONE: u8 = 95;
    pub const FINISHED: u8 = 100;
}

static CONVERTER_UNAVAILABLE_WARNING: Once = Once::new();

/// Receives progress updates (0..=100) for the document being extracted.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, progress: u8) {
        self(progress)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _progress: u8) {}
}

pub struct ExtractionOrchestrator {
    config: Arc<ExtractionConfig>,
    availability: EngineAvailability,
    converter: Arc<dyn OfficeConverter>,
    ocr: OcrFallbackEngine,
    pdf_chain: PdfTextChain,
}

impl std::fmt::Debug for ExtractionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionOrchestrator")
            .field("availability", &self.availability)
            .field("pdf_chain", &self.pdf_chain)
            .field("ocr", &self.ocr)
            .finish()
    }
}

/// Wires an [`ExtractionOrchestrator`] from explicit collaborators.
///
/// Anything not supplied gets the production implementation.
pub struct OrchestratorBuilder {
    config: ExtractionConfig,
    availability: Option<EngineAvailability>,
    converter: Option<Arc<dyn OfficeConverter>>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    pdf_chain: Option<PdfTextChain>,
}

impl OrchestratorBuilder {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            availability: None,
            converter: None,
            ocr_engine: None,
            renderer: None,
            pdf_chain: None,
        }
    }

    /// Defaults to [`EngineAvailability::all`], trusting the supplied collaborators.
    pub fn availability(mut self, availability: EngineAvailability) -> Self {
        self.availability = Some(availability);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn OfficeConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    pub fn page_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn pdf_chain(mut self, chain: PdfTextChain) -> Self {
        self.pdf_chain = Some(chain);
        self
    }

    /// # Errors
    ///
    /// `Validation` when the configuration is invalid.
    pub fn build(self) -> Result<ExtractionOrchestrator> {
        self.config.validate()?;

        let availability = self.availability.unwrap_or_else(EngineAvailability::all);
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(LibreOfficeConverter::from_config(&self.config.converter)) as Arc<dyn OfficeConverter>);
        let engine = self
            .ocr_engine
            .unwrap_or_else(|| Arc::new(TesseractCli::from_config(&self.config.ocr)) as Arc<dyn OcrEngine>);

        let renderer = if availability.pdf_renderer {
            Some(
                self.renderer
                    .unwrap_or_else(|| Arc::new(PdfiumRenderer::new()) as Arc<dyn PageRenderer>),
            )
        } else {
            None
        };

        Ok(ExtractionOrchestrator {
            config: Arc::new(self.config),
            availability,
            converter,
            ocr: OcrFallbackEngine::new(engine, renderer),
            pdf_chain: self.pdf_chain.unwrap_or_default(),
        })
    }
}

impl ExtractionOrchestrator {
    pub fn builder(config: ExtractionConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Probe the installed engines once and wire the production collaborators.
    pub async fn from_environment(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let availability = EngineAvailability::probe(&config).await;
        Self::builder(config).availability(availability).build()
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn availability(&self) -> EngineAvailability {
        self.availability
    }

    #[tracing::instrument(skip(self, document, progress), fields(document_id = %document.id))]
    pub async fn extract(&self, document: &DocumentRef, progress: &dyn ProgressSink) -> Result<ExtractionResult> {
        let config = Arc::clone(&self.config);
        self.extract_with_config(document, &config, progress).await
    }

    /// Like [`extract`](Self::extract) with a per-call configuration override.
    pub async fn extract_with_config(
        &self,
        document: &DocumentRef,
        config: &ExtractionConfig,
        progress: &dyn ProgressSink,
    ) -> Result<ExtractionResult> {
        config.validate()?;
        progress.report(milestones::STARTED);

        let sniffed = {
            let path = document.path.clone();
            let declared = document.declared_type.clone();
            tokio::task::spawn_blocking(move || sniff_format(&path, declared.as_deref()))
                .await
                .map_err(|e| DocsiftError::Other(format!("Format detection task failed: {}", e)))??
        };
        tracing::debug!(
            "{} classified as {:?} (by {:?})",
            document.path.display(),
            sniffed.category,
            sniffed.detected_by
        );

        let mut run = Run::new(GarbledTextDetector::from_config(config));

        match sniffed.category {
            FormatCategory::NativePdf => {
                self.pdf_attempt(&mut run, &document.path, ExtractionStrategy::NativeText, config, progress)
                    .await?;
            }
            FormatCategory::OfficeBinary(kind) => {
                self.office_attempt(&mut run, &document.path, kind, config, progress).await?;
            }
            FormatCategory::PlainText => {
                let charset = charset_from_declared(document.declared_type.as_deref());
                let native = read_text_file(&document.path, charset).await?;
                run.record_native(ExtractionStrategy::NativeText, native);
                progress.report(milestones::NATIVE_DONE);
            }
            FormatCategory::Image => {
                self.image_attempt(&mut run, &document.path, config, progress).await?;
            }
            FormatCategory::Unsupported => {
                return Err(DocsiftError::UnsupportedFormat(document.path.display().to_string()));
            }
        }

        let result = run.finalize(&document.id)?;
        progress.report(milestones::FINISHED);

        tracing::debug!(
            "Finalized {} from {} ({} chars, confidence {:.3}, {} attempts)",
            document.id,
            result.source,
            result.final_text.chars().count(),
            result.confidence,
            result.attempts.len()
        );

        Ok(result)
    }

    /// Text layer of a PDF, escalating to OCR of the same file when unusable.
    async fn pdf_attempt(
        &self,
        run: &mut Run,
        pdf_path: &Path,
        strategy: ExtractionStrategy,
        config: &ExtractionConfig,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let native = extract_pdf_text(&self.pdf_chain, pdf_path).await?;
        let clean = run.record_native(strategy, native);
        progress.report(milestones::NATIVE_DONE);

        if clean {
            return Ok(());
        }

        self.ocr_pdf_attempt(run, pdf_path, config, progress).await;
        Ok(())
    }

    /// OCR of a PDF file; runs at most once per document.
    async fn ocr_pdf_attempt(&self, run: &mut Run, pdf_path: &Path, config: &ExtractionConfig, progress: &dyn ProgressSink) {
        if run.ocr_attempted {
            return;
        }
        if !config.ocr.enabled {
            tracing::debug!("OCR disabled, keeping the native result for {}", pdf_path.display());
            return;
        }
        run.ocr_attempted = true;

        if !self.availability.can_ocr_pdf() {
            let reason = if self.availability.ocr {
                "PDF rasterizer (pdfium) is not available; scanned PDFs cannot be OCR'd".to_string()
            } else {
                ExternalTool::Tesseract.install_hint()
            };
            tracing::warn!("Cannot OCR {}: {}", pdf_path.display(), reason);
            run.failures.push(DocsiftError::OcrEngineUnavailable(reason));
            return;
        }

        progress.report(milestones::OCR_STARTED);
        let on_page = |done: usize, total: usize| {
            let span = (milestones::OCR_DONE - milestones::OCR_STARTED) as usize;
            progress.report(milestones::OCR_STARTED + (span * done / total.max(1)) as u8);
        };

        match self.ocr.ocr_pdf(pdf_path, &config.ocr, &on_page).await {
            Ok(output) => run.record_ocr(output),
            Err(e) => {
                tracing::warn!("OCR of {} failed: {}", pdf_path.display(), e);
                run.failures.push(e);
            }
        }
    }

    async fn office_attempt(
        &self,
        run: &mut Run,
        path: &Path,
        kind: OfficeKind,
        config: &ExtractionConfig,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let target = kind.conversion_target();

        let conversion = if !config.converter.enabled {
            Err(DocsiftError::ConverterUnavailable(
                "office conversion is disabled in configuration".to_string(),
            ))
        } else if !self.availability.converter {
            Err(DocsiftError::ConverterUnavailable(ExternalTool::Soffice.install_hint()))
        } else {
            let timeout = Duration::from_secs(config.converter.timeout_secs);
            self.converter.convert(path, target, timeout).await
        };

        let converted = match conversion {
            Ok(converted) => converted,
            Err(e) => {
                log_conversion_failure(&e);
                if kind != OfficeKind::Spreadsheet {
                    return Err(e);
                }
                // The original workbook is still readable without conversion
                run.failures.push(e);
                let native = read_workbook(path).await?;
                run.record_native(ExtractionStrategy::NativeText, native);
                progress.report(milestones::NATIVE_DONE);
                return Ok(());
            }
        };

        tracing::debug!("Converted {} to {}", path.display(), converted.path().display());

        match kind {
            OfficeKind::Spreadsheet => {
                let native = read_workbook(converted.path()).await?;
                let unreadable = native.outcome.is_failed();
                let mut clean = run.record_native(ExtractionStrategy::OfficeConverted, native);

                if unreadable {
                    let native = read_workbook(path).await?;
                    clean = run.record_native(ExtractionStrategy::NativeText, native);
                }
                progress.report(milestones::NATIVE_DONE);

                if !clean {
                    self.spreadsheet_ocr_attempt(run, path, config, progress).await;
                }
            }
            OfficeKind::Word | OfficeKind::Presentation => {
                self.pdf_attempt(run, converted.path(), ExtractionStrategy::OfficeConverted, config, progress)
                    .await?;
            }
        }

        Ok(())
    }

    /// Workbooks have no page images, so OCR goes through a PDF rendering of the original.
    async fn spreadsheet_ocr_attempt(
        &self,
        run: &mut Run,
        path: &Path,
        config: &ExtractionConfig,
        progress: &dyn ProgressSink,
    ) {
        if run.ocr_attempted || !config.ocr.enabled {
            return;
        }
        if !self.availability.can_ocr_pdf() {
            // Records the missing engine without a pointless conversion
            self.ocr_pdf_attempt(run, path, config, progress).await;
            return;
        }

        let timeout = Duration::from_secs(config.converter.timeout_secs);
        match self.converter.convert(path, "pdf", timeout).await {
            Ok(pdf) => {
                tracing::debug!("Rendered {} to {} for OCR", path.display(), pdf.path().display());
                self.ocr_pdf_attempt(run, pdf.path(), config, progress).await;
            }
            Err(e) => {
                log_conversion_failure(&e);
                run.failures.push(e);
            }
        }
    }

    async fn image_attempt(
        &self,
        run: &mut Run,
        path: &Path,
        config: &ExtractionConfig,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        if !config.ocr.enabled {
            return Err(DocsiftError::OcrEngineUnavailable(
                "OCR is disabled in configuration; images can only be extracted with OCR".to_string(),
            ));
        }
        if !self.availability.ocr {
            return Err(DocsiftError::OcrEngineUnavailable(ExternalTool::Tesseract.install_hint()));
        }

        run.ocr_attempted = true;
        progress.report(milestones::OCR_STARTED);

        let output = self.ocr.ocr_image(path, &config.ocr).await?;
        run.record_ocr(output);
        progress.report(milestones::OCR_DONE);

        Ok(())
    }
}

fn log_conversion_failure(err: &DocsiftError) {
    if !matches!(err, DocsiftError::ConverterUnavailable(_)) {
        tracing::warn!("Office conversion failed: {}", err);
        return;
    }

    let mut first = false;
    CONVERTER_UNAVAILABLE_WARNING.call_once(|| {
        first = true;
        tracing::warn!("Office converter unavailable: {}", err);
    });
    if !first {
        tracing::debug!("Office converter unavailable: {}", err);
    }
}

async fn read_workbook(path: &Path) -> Result<NativeExtraction> {
    let path = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || read_workbook_text(&path))
        .await
        .map_err(|e| DocsiftError::Other(format!("Spreadsheet extraction task failed: {}", e)))?;

    match text {
        Err(DocsiftError::Io(e)) => Err(DocsiftError::Io(e)),
        other => Ok(NativeExtraction::new(NativeOutcome::from_result(other))),
    }
}

/// Attempts and side facts collected while one document is processed.
struct Run {
    detector: GarbledTextDetector,
    attempts: Vec<ExtractionAttempt>,
    page_count: Option<usize>,
    failed_pages: Vec<usize>,
    encoding: Option<String>,
    ocr_attempted: bool,
    /// Stage failures; they only matter when no attempt produced text.
    failures: Vec<DocsiftError>,
}

impl Run {
    fn new(detector: GarbledTextDetector) -> Self {
        Self {
            detector,
            attempts: Vec::new(),
            page_count: None,
            failed_pages: Vec::new(),
            encoding: None,
            ocr_attempted: false,
            failures: Vec::new(),
        }
    }

    /// Score `text` and keep it; returns whether the attempt is clean.
    fn record(&mut self, strategy: ExtractionStrategy, text: String) -> bool {
        let verdict = self.detector.detect(&text);
        let attempt = ExtractionAttempt {
            strategy,
            raw_text: text,
            garbled_ratio: verdict.ratio,
            is_garbled: verdict.is_garbled,
            inconclusive: verdict.inconclusive,
        };

        tracing::debug!(
            "{} attempt: {} chars, ratio {:.3}, garbled {}{}{}",
            strategy,
            attempt.raw_text.chars().count(),
            attempt.garbled_ratio,
            attempt.is_garbled,
            if attempt.inconclusive { ", inconclusive" } else { "" },
            verdict
                .matched_pattern
                .map(|p| format!(", matched {:?}", p))
                .unwrap_or_default()
        );

        let clean = attempt.is_clean();
        self.attempts.push(attempt);
        clean
    }

    fn record_native(&mut self, strategy: ExtractionStrategy, native: NativeExtraction) -> bool {
        if self.page_count.is_none() {
            self.page_count = native.page_count;
        }
        if native.encoding.is_some() {
            self.encoding = native.encoding;
        }

        match native.outcome {
            NativeOutcome::Failed(reason) => {
                tracing::debug!("{} extraction failed: {}", strategy, reason);
                self.failures.push(DocsiftError::NativeExtractionFailed(reason));
                self.record(strategy, String::new());
                false
            }
            outcome => self.record(strategy, outcome.into_text()),
        }
    }

    fn record_ocr(&mut self, output: OcrOutput) {
        if self.page_count.is_none() {
            self.page_count = Some(output.page_count);
        }
        if output.page_count > 0 && output.failed_pages.len() == output.page_count {
            self.failures.push(DocsiftError::ocr(format!(
                "OCR failed on all {} pages",
                output.page_count
            )));
        }
        self.failed_pages = output.failed_pages;
        self.record(ExtractionStrategy::Ocr, output.text);
    }

    fn winner(&self) -> Option<usize> {
        if let Some(index) = self.attempts.iter().position(ExtractionAttempt::is_clean) {
            return Some(index);
        }

        let mut best: Option<usize> = None;
        for (index, attempt) in self.attempts.iter().enumerate() {
            if attempt.is_empty() {
                continue;
            }
            match best {
                Some(current) if self.attempts[current].garbled_ratio <= attempt.garbled_ratio => {}
                _ => best = Some(index),
            }
        }
        best
    }

    /// Most actionable failure: a missing dependency first, then the earliest.
    fn into_failure(mut self) -> Option<DocsiftError> {
        if self.failures.len() > 1 {
            for failure in &self.failures {
                tracing::debug!("Stage failure: {}", failure);
            }
        }
        let index = self
            .failures
            .iter()
            .position(DocsiftError::is_missing_dependency)
            .unwrap_or(0);
        (index < self.failures.len()).then(|| self.failures.swap_remove(index))
    }

    fn finalize(self, document_id: &str) -> Result<ExtractionResult> {
        let attempts: Vec<_> = self.attempts.iter().map(ExtractionAttempt::summary).collect();

        let (final_text, strategy, confidence) = match self.winner() {
            Some(index) => {
                let winner = &self.attempts[index];
                if !winner.is_clean() {
                    tracing::info!(
                        "{}: no clean text, keeping {} attempt with garbled ratio {:.3}",
                        document_id,
                        winner.strategy,
                        winner.garbled_ratio
                    );
                }
                (winner.raw_text.clone(), winner.strategy, winner.garbled_ratio)
            }
            None => {
                let Some(last) = self.attempts.last().map(|a| a.strategy) else {
                    return Err(self.into_failure().unwrap_or_else(|| {
                        DocsiftError::NativeExtractionFailed("no extraction strategy applied".to_string())
                    }));
                };
                if !self.failures.is_empty() {
                    return Err(self
                        .into_failure()
                        .unwrap_or_else(|| DocsiftError::NativeExtractionFailed("no text extracted".to_string())));
                }
                tracing::info!("{}: every strategy ran and found no text", document_id);
                (String::new(), last, 1.0)
            }
        };

        let failed_pages = if strategy == ExtractionStrategy::Ocr {
            self.failed_pages
        } else {
            Vec::new()
        };

        Ok(ExtractionResult {
            document_id: document_id.to_string(),
            final_text,
            source: strategy.source(),
            confidence,
            page_count: self.page_count,
            failed_pages,
            encoding: self.encoding,
            attempts,
        })
    }
}
