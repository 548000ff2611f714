//! Page-by-page OCR of PDFs and images.
//!
//! Failures are contained per page: a page that cannot be rendered, times out, or
//! that the engine chokes on contributes empty text and is listed in
//! [`OcrOutput::failed_pages`]. Only a missing engine (or rasterizer) aborts the run.

use super::preprocess::preprocess;
use super::render::PageRenderer;
use super::tesseract::OcrEngine;
use crate::core::config::OcrConfig;
use crate::error::{DocsiftError, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Separator placed between pages of OCR text.
pub const PAGE_BREAK: &str = "\n\n\u{000C}\n\n";

/// Per-page progress callback: `(pages_done, page_count)`.
pub type PageCallback<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrOutput {
    /// Page texts in page order joined by [`PAGE_BREAK`].
    pub text: String,
    pub page_count: usize,
    /// Zero-based indexes of pages that produced no text because of a failure.
    pub failed_pages: Vec<usize>,
}

impl OcrOutput {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Clone)]
pub struct OcrFallbackEngine {
    engine: Arc<dyn OcrEngine>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl std::fmt::Debug for OcrFallbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrFallbackEngine")
            .field("has_renderer", &self.renderer.is_some())
            .finish()
    }
}

impl OcrFallbackEngine {
    /// Without a renderer only images can be recognized.
    pub fn new(engine: Arc<dyn OcrEngine>, renderer: Option<Arc<dyn PageRenderer>>) -> Self {
        Self { engine, renderer }
    }

    pub fn can_render_pdf(&self) -> bool {
        self.renderer.is_some()
    }

    pub async fn ocr_image(&self, path: &Path, config: &OcrConfig) -> Result<OcrOutput> {
        let bytes = tokio::fs::read(path).await?;
        let preprocess_enabled = config.preprocess;

        let prepared = tokio::task::spawn_blocking(move || -> Result<DynamicImage> {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| DocsiftError::parsing_with_source("Failed to decode image", e))?;
            Ok(prepare(image, preprocess_enabled))
        })
        .await
        .map_err(|e| DocsiftError::Other(format!("Image decoding task failed: {}", e)))??;

        let mut failed_pages = Vec::new();
        let text = match self.recognize_page(&prepared, 0, config).await? {
            Some(text) => text,
            None => {
                failed_pages.push(0);
                String::new()
            }
        };

        Ok(OcrOutput {
            text,
            page_count: 1,
            failed_pages,
        })
    }

    pub async fn ocr_pdf(&self, path: &Path, config: &OcrConfig, on_page: PageCallback<'_>) -> Result<OcrOutput> {
        let renderer = self.renderer.clone().ok_or_else(|| {
            DocsiftError::OcrEngineUnavailable("PDF rasterizer (pdfium) is not available; cannot OCR PDF pages".into())
        })?;

        // Pages are rendered on one blocking thread that keeps the document open,
        // and recognized here as they arrive
        let (sender, mut receiver) = mpsc::channel::<RenderedPage>(1);
        let producer = {
            let renderer = Arc::clone(&renderer);
            let pdf_path: PathBuf = path.to_path_buf();
            let dpi = config.dpi;
            let preprocess_enabled = config.preprocess;
            tokio::task::spawn_blocking(move || {
                renderer.render_pages(&pdf_path, dpi, &mut |index: usize, page_count: usize, image: Result<DynamicImage>| {
                    let page = RenderedPage {
                        index,
                        page_count,
                        image: image.map(|image| prepare(image, preprocess_enabled)),
                    };
                    sender.blocking_send(page).is_ok()
                })
            })
        };

        let mut pages = Vec::new();
        let mut failed_pages = Vec::new();

        while let Some(page) = receiver.recv().await {
            let page_text = match page.image {
                Ok(image) => self.recognize_page(&image, page.index, config).await?,
                Err(e @ DocsiftError::OcrEngineUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping page {} of {}: {}", page.index, path.display(), e);
                    None
                }
            };

            match page_text {
                Some(text) => pages.push(text),
                None => {
                    failed_pages.push(page.index);
                    pages.push(String::new());
                }
            }

            on_page(page.index + 1, page.page_count);
        }

        let page_count = producer
            .await
            .map_err(|e| DocsiftError::Other(format!("Page render task failed: {}", e)))??;
        tracing::debug!("OCR of {} finished ({} pages)", path.display(), page_count);

        Ok(OcrOutput {
            text: pages.join(PAGE_BREAK),
            page_count,
            failed_pages,
        })
    }

    /// `Ok(None)` when this page failed but the run can continue.
    async fn recognize_page(&self, image: &DynamicImage, page_index: usize, config: &OcrConfig) -> Result<Option<String>> {
        let limit = Duration::from_secs(config.page_timeout_secs);

        match tokio::time::timeout(limit, self.engine.recognize(image, &config.languages)).await {
            Ok(Ok(text)) => Ok(Some(text)),
            Ok(Err(e)) if e.is_missing_dependency() => Err(e),
            Ok(Err(e)) => {
                tracing::warn!("OCR failed on page {}: {}", page_index, e);
                Ok(None)
            }
            Err(_) => {
                let timeout = DocsiftError::OcrTimeout {
                    page: page_index,
                    seconds: limit.as_secs(),
                };
                tracing::warn!("{}", timeout);
                Ok(None)
            }
        }
    }
}

struct RenderedPage {
    index: usize,
    page_count: usize,
    image: Result<DynamicImage>,
}

fn prepare(image: DynamicImage, preprocess_enabled: bool) -> DynamicImage {
    if preprocess_enabled {
        DynamicImage::ImageLuma8(preprocess(&image))
    } else {
        image
    }
}
