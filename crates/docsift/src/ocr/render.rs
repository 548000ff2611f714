//! PDF page rasterization for OCR.
//!
//! Pages are rendered with pdfium at a resolution tuned for recognition. Oversized
//! pages get their DPI lowered so neither dimension exceeds
//! [`PageRenderOptions::max_image_dimension`].

use crate::error::{DocsiftError, Result};
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const PDF_POINTS_PER_INCH: f64 = 72.0;

/// Renders pages of a PDF file to bitmaps.
///
/// Implementations are synchronous; callers run them on a blocking thread.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf_path: &Path) -> Result<usize>;

    /// Render the zero-based `page_index` at (roughly) `dpi`.
    fn render_page(&self, pdf_path: &Path, page_index: usize, dpi: i32) -> Result<DynamicImage>;

    /// Render every page in order, passing `(page_index, page_count, image)` to
    /// `on_page`. Rendering stops early when `on_page` returns `false`. A page
    /// that fails to render is handed over as an `Err`; only failing to open the
    /// document fails the call. Returns the page count.
    ///
    /// The default goes through [`page_count`](Self::page_count) and
    /// [`render_page`](Self::render_page). Renderers that can keep one document
    /// open for the whole run override it.
    fn render_pages(
        &self,
        pdf_path: &Path,
        dpi: i32,
        on_page: &mut dyn FnMut(usize, usize, Result<DynamicImage>) -> bool,
    ) -> Result<usize> {
        let page_count = self.page_count(pdf_path)?;
        for page_index in 0..page_count {
            if !on_page(page_index, page_count, self.render_page(pdf_path, page_index, dpi)) {
                break;
            }
        }
        Ok(page_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRenderOptions {
    pub target_dpi: i32,
    pub max_image_dimension: i32,
    pub auto_adjust_dpi: bool,
    pub min_dpi: i32,
    pub max_dpi: i32,
}

impl Default for PageRenderOptions {
    fn default() -> Self {
        Self {
            target_dpi: 300,
            max_image_dimension: 10_000,
            auto_adjust_dpi: true,
            min_dpi: 72,
            max_dpi: 600,
        }
    }
}

impl PageRenderOptions {
    pub fn with_dpi(dpi: i32) -> Self {
        Self {
            target_dpi: dpi,
            ..Self::default()
        }
    }

    /// DPI to use for a page of the given size in points.
    pub fn effective_dpi(&self, width_points: f64, height_points: f64) -> i32 {
        if self.auto_adjust_dpi {
            calculate_optimal_dpi(
                width_points,
                height_points,
                self.target_dpi,
                self.max_image_dimension,
                self.min_dpi,
                self.max_dpi,
            )
        } else {
            self.target_dpi
        }
    }
}

/// [`PageRenderer`] backed by the pdfium library.
///
/// Looks for the shared library next to the executable (or in `library_dir`)
/// first, then falls back to the system library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_dir: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_dir(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(library_dir.into()),
        }
    }

    /// Whether pdfium can be bound in this process.
    pub fn is_available(&self) -> bool {
        match self.bind() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("pdfium not available: {}", e);
                false
            }
        }
    }

    fn bind(&self) -> Result<Pdfium> {
        let local_dir = self.library_dir.clone().unwrap_or_else(|| PathBuf::from("./"));

        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&local_dir))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| DocsiftError::OcrEngineUnavailable(format!("PDF rasterizer (pdfium) unavailable: {}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    pub fn render_page_with_options(
        &self,
        pdf_path: &Path,
        page_index: usize,
        options: &PageRenderOptions,
    ) -> Result<DynamicImage> {
        page_number(page_index)?;

        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| DocsiftError::PageRenderFailed {
            page: page_index,
            message: format!("Failed to open PDF: {}", e),
        })?;

        render_document_page(&document, page_index, options)
    }

    fn open<'a>(pdfium: &'a Pdfium, pdf_path: &Path) -> Result<PdfDocument<'a>> {
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| DocsiftError::parsing(format!("pdfium could not open {}: {}", pdf_path.display(), e)))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        let pdfium = self.bind()?;
        let document = Self::open(&pdfium, pdf_path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(&self, pdf_path: &Path, page_index: usize, dpi: i32) -> Result<DynamicImage> {
        self.render_page_with_options(pdf_path, page_index, &PageRenderOptions::with_dpi(dpi))
    }

    /// Binds pdfium and loads the document once for all pages.
    fn render_pages(
        &self,
        pdf_path: &Path,
        dpi: i32,
        on_page: &mut dyn FnMut(usize, usize, Result<DynamicImage>) -> bool,
    ) -> Result<usize> {
        let pdfium = self.bind()?;
        let document = Self::open(&pdfium, pdf_path)?;
        let page_count = document.pages().len() as usize;
        let options = PageRenderOptions::with_dpi(dpi);

        for page_index in 0..page_count {
            let image = render_document_page(&document, page_index, &options);
            if !on_page(page_index, page_count, image) {
                break;
            }
        }

        tracing::trace!("Rendered {} pages of {} at {} DPI", page_count, pdf_path.display(), dpi);
        Ok(page_count)
    }
}

/// pdfium addresses pages with a `u16`.
fn page_number(page_index: usize) -> Result<u16> {
    u16::try_from(page_index).map_err(|_| DocsiftError::PageRenderFailed {
        page: page_index,
        message: format!("Page index {} exceeds the PDF page limit of {}", page_index, u16::MAX),
    })
}

fn render_document_page(
    document: &PdfDocument<'_>,
    page_index: usize,
    options: &PageRenderOptions,
) -> Result<DynamicImage> {
    let render_failed = |message: String| DocsiftError::PageRenderFailed {
        page: page_index,
        message,
    };

    let page = document
        .pages()
        .get(page_number(page_index)?)
        .map_err(|_| render_failed(format!("Page {} not found", page_index)))?;

    let width_points = page.width().value;
    let height_points = page.height().value;

    let dpi = options.effective_dpi(width_points as f64, height_points as f64);
    let scale = dpi as f64 / PDF_POINTS_PER_INCH;

    let config = PdfRenderConfig::new()
        .set_target_width(((width_points * scale as f32) as i32).max(1))
        .set_target_height(((height_points * scale as f32) as i32).max(1))
        .rotate_if_landscape(PdfPageRenderRotation::None, false);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| render_failed(format!("Failed to render page: {}", e)))?;

    tracing::trace!("Rendered page {} at {} DPI", page_index, dpi);

    Ok(DynamicImage::ImageRgb8(bitmap.as_image().into_rgb8()))
}

fn calculate_optimal_dpi(
    page_width: f64,
    page_height: f64,
    target_dpi: i32,
    max_dimension: i32,
    min_dpi: i32,
    max_dpi: i32,
) -> i32 {
    let width_inches = page_width / PDF_POINTS_PER_INCH;
    let height_inches = page_height / PDF_POINTS_PER_INCH;

    let width_at_target = (width_inches * target_dpi as f64) as i32;
    let height_at_target = (height_inches * target_dpi as f64) as i32;

    if width_at_target <= max_dimension && height_at_target <= max_dimension {
        return target_dpi.clamp(min_dpi, max_dpi);
    }

    let width_limited_dpi = (max_dimension as f64 / width_inches) as i32;
    let height_limited_dpi = (max_dimension as f64 / height_inches) as i32;

    width_limited_dpi.min(height_limited_dpi).clamp(min_dpi, max_dpi)
}
