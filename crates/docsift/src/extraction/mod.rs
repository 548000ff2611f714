//! Native text extraction.
//!
//! Readers that pull text straight out of a document without rendering it:
//! the PDF text layer, spreadsheet cells and plain text. The headless office
//! converter also lives here since its output re-enters these readers.
//!
//! Every reader reports through [`NativeOutcome`] so the orchestrator never has to
//! know which library failed or how.

pub mod excel;
pub mod libreoffice;
pub mod pdf;
pub mod text;

use crate::Result;

/// Normalized outcome of a native reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeOutcome {
    Success(String),
    /// The reader worked but found no text.
    Empty,
    Failed(String),
}

impl NativeOutcome {
    /// Whitespace-only text counts as empty; any error becomes `Failed`.
    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(text) if text.trim().is_empty() => Self::Empty,
            Ok(text) => Self::Success(text),
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Success(text) => text,
            Self::Empty | Self::Failed(_) => "",
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Success(text) => text,
            Self::Empty | Self::Failed(_) => String::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Native reader output plus what it learned about the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeExtraction {
    pub outcome: NativeOutcome,
    pub page_count: Option<usize>,
    /// Encoding used for plain-text input.
    pub encoding: Option<String>,
}

impl NativeExtraction {
    pub fn new(outcome: NativeOutcome) -> Self {
        Self {
            outcome,
            page_count: None,
            encoding: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(NativeOutcome::Failed(reason.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocsiftError;

    #[test]
    fn test_outcome_normalization() {
        assert_eq!(
            NativeOutcome::from_result(Ok("hello".to_string())),
            NativeOutcome::Success("hello".to_string())
        );
        assert_eq!(NativeOutcome::from_result(Ok(" \n\t".to_string())), NativeOutcome::Empty);

        let failed = NativeOutcome::from_result(Err(DocsiftError::parsing("broken xref table")));
        assert!(failed.is_failed());
        assert_eq!(failed.text(), "");
        assert!(matches!(failed, NativeOutcome::Failed(reason) if reason.contains("broken xref")));
    }
}
