//! PDF text-layer extraction.
//!
//! Two independent libraries are tried in order:
//!
//! 1. [`LopdfBackend`]: walks the content streams page by page with `lopdf`. Fast, and
//!    also tells us the page count.
//! 2. [`PdfExtractBackend`]: `pdf-extract`, slower but resolves fonts and layout more
//!    faithfully.
//!
//! The second backend only runs when the first errors or yields near-empty text.
//! Both libraries can panic on hostile input, so each call is isolated with
//! `catch_unwind` and reported as an ordinary failure.

use super::{NativeExtraction, NativeOutcome};
use crate::{DocsiftError, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

/// Text with fewer non-whitespace characters than this counts as "near-empty".
pub const NEAR_EMPTY_CHARS: usize = 16;

/// Text layer pulled out by one backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PdfText {
    pub text: String,
    pub page_count: Option<usize>,
}

/// One PDF text library.
pub trait PdfTextBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, bytes: &[u8]) -> Result<PdfText>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl PdfTextBackend for LopdfBackend {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<PdfText> {
        let mut document = lopdf::Document::load_mem(bytes)
            .map_err(|e| DocsiftError::parsing(format!("Failed to load PDF: {}", e)))?;

        if document.is_encrypted() && document.decrypt("").is_err() {
            return Err(DocsiftError::parsing("PDF is password protected"));
        }

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let page_count = page_numbers.len();

        let mut pages = Vec::with_capacity(page_count);
        let mut failures = 0usize;
        for page_number in &page_numbers {
            match document.extract_text(&[*page_number]) {
                Ok(text) => pages.push(text.trim().to_string()),
                Err(e) => {
                    failures += 1;
                    tracing::debug!("lopdf could not extract page {}: {}", page_number, e);
                    pages.push(String::new());
                }
            }
        }

        if page_count > 0 && failures == page_count {
            return Err(DocsiftError::parsing(format!(
                "lopdf failed to extract text from all {} pages",
                page_count
            )));
        }

        Ok(PdfText {
            text: pages.join("\n\n").trim().to_string(),
            page_count: Some(page_count),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractBackend;

impl PdfTextBackend for PdfExtractBackend {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8]) -> Result<PdfText> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| DocsiftError::parsing(format!("pdf-extract failed: {}", e)))?;

        Ok(PdfText { text, page_count: None })
    }
}

/// Ordered list of backends; the first non-near-empty result wins.
#[derive(Clone)]
pub struct PdfTextChain {
    backends: Vec<Arc<dyn PdfTextBackend>>,
}

impl Default for PdfTextChain {
    fn default() -> Self {
        Self::new(vec![Arc::new(LopdfBackend), Arc::new(PdfExtractBackend)])
    }
}

impl std::fmt::Debug for PdfTextChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("PdfTextChain").field("backends", &names).finish()
    }
}

impl PdfTextChain {
    pub fn new(backends: Vec<Arc<dyn PdfTextBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Run the chain over an in-memory PDF.
    ///
    /// Returns `Success` with the first substantial text, otherwise the longest
    /// near-empty text, `Empty` when every backend worked but found nothing, or
    /// `Failed` with every backend's reason when none worked.
    pub fn extract(&self, bytes: &[u8]) -> NativeExtraction {
        let mut page_count = None;
        let mut best_short = String::new();
        let mut any_succeeded = false;
        let mut reasons = Vec::new();

        for backend in &self.backends {
            let outcome = catch_unwind(AssertUnwindSafe(|| backend.extract(bytes)));

            let pdf_text = match outcome {
                Ok(Ok(pdf_text)) => pdf_text,
                Ok(Err(e)) => {
                    tracing::debug!("PDF backend {} failed: {}", backend.name(), e);
                    reasons.push(format!("{}: {}", backend.name(), e));
                    continue;
                }
                Err(_) => {
                    tracing::warn!("PDF backend {} panicked", backend.name());
                    reasons.push(format!("{}: panicked while parsing", backend.name()));
                    continue;
                }
            };

            any_succeeded = true;
            if page_count.is_none() {
                page_count = pdf_text.page_count;
            }

            if !is_near_empty(&pdf_text.text) {
                tracing::debug!("PDF backend {} produced {} bytes of text", backend.name(), pdf_text.text.len());
                return NativeExtraction {
                    outcome: NativeOutcome::Success(pdf_text.text),
                    page_count,
                    encoding: None,
                };
            }

            tracing::debug!("PDF backend {} produced near-empty text, trying next", backend.name());
            if pdf_text.text.trim().len() > best_short.trim().len() {
                best_short = pdf_text.text;
            }
        }

        let outcome = if !any_succeeded {
            NativeOutcome::Failed(reasons.join("; "))
        } else {
            NativeOutcome::from_result(Ok(best_short))
        };

        NativeExtraction {
            outcome,
            page_count,
            encoding: None,
        }
    }
}

fn is_near_empty(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).take(NEAR_EMPTY_CHARS).count() < NEAR_EMPTY_CHARS
}

/// Read `path` and run the chain on a blocking thread.
///
/// IO errors reading the file bubble up; everything the libraries do wrong is
/// folded into the returned outcome.
pub async fn extract_pdf_text(chain: &PdfTextChain, path: &Path) -> Result<NativeExtraction> {
    let bytes = tokio::fs::read(path).await?;
    let chain = chain.clone();

    tokio::task::spawn_blocking(move || chain.extract(&bytes))
        .await
        .map_err(|e| DocsiftError::Other(format!("PDF extraction task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        name: &'static str,
        result: std::result::Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl FixedBackend {
        fn ok(name: &'static str, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(text),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, reason: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err(reason),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PdfTextBackend for FixedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn extract(&self, _bytes: &[u8]) -> Result<PdfText> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(text) => Ok(PdfText {
                    text: text.to_string(),
                    page_count: Some(2),
                }),
                Err(reason) => Err(DocsiftError::parsing(reason)),
            }
        }
    }

    fn chain_of(backends: Vec<Arc<dyn PdfTextBackend>>) -> PdfTextChain {
        PdfTextChain::new(backends)
    }

    struct PanickingBackend;

    impl PdfTextBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn extract(&self, _bytes: &[u8]) -> Result<PdfText> {
            panic!("malformed object stream");
        }
    }

    #[test]
    fn test_second_backend_skipped_when_first_succeeds() {
        let first = FixedBackend::ok("a", "Annual report of the finance committee");
        let second = FixedBackend::ok("b", "unused");
        let chain = chain_of(vec![first.clone(), second.clone()]);

        let result = chain.extract(b"%PDF-1.4");
        assert_eq!(
            result.outcome,
            NativeOutcome::Success("Annual report of the finance committee".to_string())
        );
        assert_eq!(result.page_count, Some(2));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_falls_back_on_error() {
        let first = FixedBackend::err("a", "broken xref");
        let second = FixedBackend::ok("b", "Recovered text from the second library");
        let chain = chain_of(vec![first, second.clone()]);

        let result = chain.extract(b"%PDF-1.4");
        assert_eq!(result.outcome.text(), "Recovered text from the second library");
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_falls_back_on_near_empty() {
        let first = FixedBackend::ok("a", "  1  ");
        let second = FixedBackend::ok("b", "Full page of properly decoded text");
        let chain = chain_of(vec![first, second.clone()]);

        let result = chain.extract(b"%PDF-1.4");
        assert_eq!(result.outcome.text(), "Full page of properly decoded text");
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_near_empty_from_both_keeps_longest() {
        let chain = chain_of(vec![FixedBackend::ok("a", "p1"), FixedBackend::ok("b", "page 1")]);
        let result = chain.extract(b"%PDF-1.4");
        assert_eq!(result.outcome, NativeOutcome::Success("page 1".to_string()));
    }

    #[test]
    fn test_empty_from_both_is_empty() {
        let chain = chain_of(vec![FixedBackend::ok("a", ""), FixedBackend::ok("b", "\n")]);
        assert_eq!(chain.extract(b"%PDF-1.4").outcome, NativeOutcome::Empty);
    }

    #[test]
    fn test_both_failing_is_failed_with_reasons() {
        let chain = chain_of(vec![
            FixedBackend::err("a", "broken xref"),
            FixedBackend::err("b", "unknown font"),
        ]);

        match chain.extract(b"garbage").outcome {
            NativeOutcome::Failed(reason) => {
                assert!(reason.contains("broken xref"));
                assert!(reason.contains("unknown font"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panicking_backend_is_contained() {
        let second = FixedBackend::ok("b", "Text recovered after a library panic");
        let chain = chain_of(vec![Arc::new(PanickingBackend), second]);

        let result = chain.extract(b"%PDF-1.4");
        assert_eq!(result.outcome.text(), "Text recovered after a library panic");
    }

    #[test]
    fn test_real_backends_reject_garbage() {
        let result = PdfTextChain::default().extract(b"this is not a pdf at all");
        assert!(result.outcome.is_failed());
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(PdfTextChain::default().backend_names(), vec!["lopdf", "pdf-extract"]);
    }
}
