//! Shared fixtures and fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use docsift::core::config::ExtractionConfig;
use docsift::core::orchestrator::ExtractionOrchestrator;
use docsift::error::{DocsiftError, Result};
use docsift::extraction::libreoffice::{ConvertedDocument, OfficeConverter};
use docsift::extraction::pdf::{PdfText, PdfTextBackend, PdfTextChain};
use docsift::ocr::render::PageRenderer;
use docsift::ocr::tesseract::OcrEngine;
use docsift::EngineAvailability;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const CLEAN_TEXT: &str = "Quarterly revenue grew across all northern regions this year.";
pub const OCR_TEXT: &str = "Scanned invoice number 4471 issued to the harbour authority.";
pub const GARBLED_TEXT: &str = "D3F G7H J2K";

/// Header that marks a fake PDF; [`EchoBackend`] returns whatever follows it.
pub const FAKE_PDF_HEADER: &str = "%PDF-1.4\n";

/// Config with preprocessing off and small timeouts.
pub fn test_config() -> ExtractionConfig {
    let mut config = ExtractionConfig::default();
    config.ocr.preprocess = false;
    config.ocr.page_timeout_secs = 5;
    config.ocr.languages = vec!["eng".to_string()];
    config.converter.timeout_secs = 5;
    config.tasks.workers = 2;
    config
}

/// Write a fake PDF whose "text layer" is `body`.
pub fn write_fake_pdf(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("{}{}", FAKE_PDF_HEADER, body)).unwrap();
    path
}

/// A real single-page PDF built with lopdf.
pub fn write_lopdf_pdf(dir: &Path, name: &str, text: &str) -> PathBuf {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let path = dir.join(name);
    doc.save(&path).unwrap();
    path
}

/// Text layer backend that reads back what [`write_fake_pdf`] wrote.
#[derive(Debug, Default)]
pub struct EchoBackend;

impl PdfTextBackend for EchoBackend {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn extract(&self, bytes: &[u8]) -> Result<PdfText> {
        let content = String::from_utf8_lossy(bytes);
        let body = content
            .strip_prefix(FAKE_PDF_HEADER)
            .ok_or_else(|| DocsiftError::parsing("not a fake PDF"))?;
        Ok(PdfText {
            text: body.to_string(),
            page_count: Some(1),
        })
    }
}

pub fn echo_chain() -> PdfTextChain {
    PdfTextChain::new(vec![Arc::new(EchoBackend)])
}

/// OCR engine returning fixed text and counting calls.
#[derive(Debug)]
pub struct CountingOcr {
    text: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingOcr {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for CountingOcr {
    async fn recognize(&self, _image: &DynamicImage, _languages: &[String]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.text.clone())
    }
}

/// Renderer producing blank pages.
#[derive(Debug)]
pub struct BlankRenderer {
    pub pages: usize,
}

impl PageRenderer for BlankRenderer {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize> {
        Ok(self.pages)
    }

    fn render_page(&self, _pdf_path: &Path, _page_index: usize, _dpi: i32) -> Result<DynamicImage> {
        Ok(DynamicImage::new_luma8(64, 64))
    }
}

#[derive(Debug, Clone)]
pub enum ConverterBehavior {
    /// Produce a fake PDF with this text layer.
    Produce(String),
    Unavailable,
    Timeout,
}

/// Office converter that writes fake PDFs into a scratch directory.
#[derive(Debug)]
pub struct FakeConverter {
    behavior: ConverterBehavior,
    workdir: tempfile::TempDir,
    calls: AtomicUsize,
}

impl FakeConverter {
    pub fn new(behavior: ConverterBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            workdir: tempfile::tempdir().unwrap(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OfficeConverter for FakeConverter {
    async fn convert(&self, input: &Path, target_format: &str, timeout: Duration) -> Result<ConvertedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ConverterBehavior::Produce(text) => {
                let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("converted");
                let path = write_fake_pdf(self.workdir.path(), &format!("{}.{}", stem, target_format), text);
                Ok(ConvertedDocument::at(path))
            }
            ConverterBehavior::Unavailable => Err(DocsiftError::ConverterUnavailable(
                "LibreOffice (soffice) not found".to_string(),
            )),
            ConverterBehavior::Timeout => Err(DocsiftError::ConversionTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }
}

/// Orchestrator wired entirely with fakes.
pub struct Harness {
    pub ocr: Arc<CountingOcr>,
    pub converter: Arc<FakeConverter>,
    pub orchestrator: ExtractionOrchestrator,
}

pub fn harness(config: ExtractionConfig, availability: EngineAvailability, ocr: Arc<CountingOcr>, converter: Arc<FakeConverter>) -> Harness {
    let orchestrator = ExtractionOrchestrator::builder(config)
        .availability(availability)
        .converter(converter.clone())
        .ocr_engine(ocr.clone())
        .page_renderer(Arc::new(BlankRenderer { pages: 2 }))
        .pdf_chain(echo_chain())
        .build()
        .unwrap();

    Harness {
        ocr,
        converter,
        orchestrator,
    }
}

pub fn default_harness() -> Harness {
    harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(CLEAN_TEXT.to_string())),
    )
}
