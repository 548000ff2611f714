//! OCR fallback.
//!
//! Renders PDF pages (or takes an image as is), cleans the bitmap up and runs
//! recognition page by page. The engine and the rasterizer are trait objects so
//! the orchestrator can run against deterministic fakes.

pub mod fallback;
pub mod preprocess;
pub mod render;
pub mod tesseract;

pub use fallback::{OcrFallbackEngine, OcrOutput, PAGE_BREAK};
pub use render::{PageRenderOptions, PageRenderer, PdfiumRenderer};
pub use tesseract::{OcrEngine, TesseractCli};
