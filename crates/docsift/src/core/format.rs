//! Input classification.
//!
//! Maps a document to the handling category that decides which extraction chain
//! runs. The extension (declared type first, then the path's own) wins; the first
//! bytes of the file are only inspected when the extension is missing or not one
//! we know.

use crate::{DocsiftError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const PLAIN_TEXT_MIME_TYPE: &str = "text/plain";
pub const DOCX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const EXCEL_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const POWER_POINT_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const LEGACY_WORD_MIME_TYPE: &str = "application/msword";
pub const LEGACY_EXCEL_MIME_TYPE: &str = "application/vnd.ms-excel";
pub const LEGACY_POWERPOINT_MIME_TYPE: &str = "application/vnd.ms-powerpoint";

const PDF_MAGIC: &[u8] = b"%PDF-";
const SNIFF_LEN: usize = 8192;

/// Flavour of an office document; decides the conversion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfficeKind {
    Word,
    Spreadsheet,
    Presentation,
}

impl OfficeKind {
    /// Format the headless converter is asked to produce.
    pub fn conversion_target(self) -> &'static str {
        match self {
            Self::Word | Self::Presentation => "pdf",
            Self::Spreadsheet => "xlsx",
        }
    }
}

/// Handling category of an input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCategory {
    NativePdf,
    OfficeBinary(OfficeKind),
    PlainText,
    Image,
    Unsupported,
}

impl FormatCategory {
    pub fn is_supported(self) -> bool {
        self != Self::Unsupported
    }
}

/// How a category was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedBy {
    Extension,
    Signature,
}

/// Outcome of [`sniff_format`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffedFormat {
    pub category: FormatCategory,
    /// Normalized extension (lowercase, no dot) best describing the content.
    pub extension: Option<String>,
    pub detected_by: DetectedBy,
}

static EXT_TO_CATEGORY: Lazy<HashMap<&'static str, FormatCategory>> = Lazy::new(|| {
    use FormatCategory::*;
    use OfficeKind::*;

    let mut m = HashMap::new();

    m.insert("pdf", NativePdf);

    for ext in ["doc", "docx", "docm", "dot", "dotx", "odt", "rtf", "wps"] {
        m.insert(ext, OfficeBinary(Word));
    }
    for ext in ["xls", "xlsx", "xlsm", "xlsb", "xla", "xlam", "xltm", "ods"] {
        m.insert(ext, OfficeBinary(Spreadsheet));
    }
    for ext in ["ppt", "pptx", "pptm", "pps", "ppsx", "odp"] {
        m.insert(ext, OfficeBinary(Presentation));
    }

    for ext in [
        "txt", "text", "md", "markdown", "csv", "tsv", "json", "xml", "html", "htm", "log", "rst", "yaml", "yml",
        "toml", "ini",
    ] {
        m.insert(ext, PlainText);
    }

    for ext in [
        "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp", "pnm", "pbm", "pgm", "ppm",
    ] {
        m.insert(ext, Image);
    }

    m
});

/// Lowercase, trimmed, without a leading dot.
pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub fn category_for_extension(extension: &str) -> FormatCategory {
    EXT_TO_CATEGORY
        .get(normalize_extension(extension).as_str())
        .copied()
        .unwrap_or(FormatCategory::Unsupported)
}

pub fn category_for_mime(mime_type: &str) -> FormatCategory {
    let mime = mime_type.trim().to_ascii_lowercase();
    let mime = mime.split(';').next().unwrap_or_default().trim();

    match mime {
        PDF_MIME_TYPE => FormatCategory::NativePdf,
        DOCX_MIME_TYPE | LEGACY_WORD_MIME_TYPE | "application/rtf" | "text/rtf" => {
            FormatCategory::OfficeBinary(OfficeKind::Word)
        }
        "application/vnd.oasis.opendocument.text" => FormatCategory::OfficeBinary(OfficeKind::Word),
        EXCEL_MIME_TYPE | LEGACY_EXCEL_MIME_TYPE | "application/vnd.oasis.opendocument.spreadsheet" => {
            FormatCategory::OfficeBinary(OfficeKind::Spreadsheet)
        }
        POWER_POINT_MIME_TYPE | LEGACY_POWERPOINT_MIME_TYPE | "application/vnd.oasis.opendocument.presentation" => {
            FormatCategory::OfficeBinary(OfficeKind::Presentation)
        }
        "application/json" | "application/xml" | "application/x-yaml" | "application/toml" => FormatCategory::PlainText,
        m if m.starts_with("text/") => FormatCategory::PlainText,
        m if m.starts_with("image/") && m != "image/svg+xml" => FormatCategory::Image,
        _ => FormatCategory::Unsupported,
    }
}

/// Classify by content alone.
pub fn sniff_bytes(head: &[u8]) -> (FormatCategory, Option<String>) {
    if head.starts_with(PDF_MAGIC) {
        return (FormatCategory::NativePdf, Some("pdf".to_string()));
    }

    if let Some(kind) = infer::get(head) {
        let category = category_for_mime(kind.mime_type());
        if category.is_supported() {
            return (category, Some(kind.extension().to_string()));
        }
    }

    if looks_like_text(head) {
        return (FormatCategory::PlainText, Some("txt".to_string()));
    }

    (FormatCategory::Unsupported, None)
}

/// Classify a document.
///
/// Resolution order:
/// 1. `declared_type` (an extension such as `".docx"` or a MIME type)
/// 2. the extension of `path`
/// 3. the file signature
///
/// # Errors
///
/// - `UnsupportedFormat` when nothing recognizes the input (terminal for the document)
/// - `Io` when the file has to be inspected but cannot be read
pub fn sniff_format(path: impl AsRef<Path>, declared_type: Option<&str>) -> Result<SniffedFormat> {
    let path = path.as_ref();

    if let Some(declared) = declared_type.filter(|d| !d.trim().is_empty()) {
        let (category, extension) = if declared.contains('/') {
            let extension = mime_guess::get_mime_extensions_str(declared)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string());
            (category_for_mime(declared), extension)
        } else {
            let extension = normalize_extension(declared);
            (category_for_extension(&extension), Some(extension))
        };

        if category.is_supported() {
            return Ok(SniffedFormat {
                category,
                extension,
                detected_by: DetectedBy::Extension,
            });
        }
    }

    let path_extension = path.extension().and_then(|e| e.to_str()).map(normalize_extension);

    if let Some(ext) = &path_extension {
        let category = category_for_extension(ext);
        if category.is_supported() {
            return Ok(SniffedFormat {
                category,
                extension: Some(ext.clone()),
                detected_by: DetectedBy::Extension,
            });
        }
    }

    let head = read_head(path)?;
    let (category, extension) = sniff_bytes(&head);

    if !category.is_supported() {
        let label = declared_type
            .map(str::to_string)
            .or(path_extension.map(|e| format!(".{}", e)))
            .unwrap_or_else(|| "no extension".to_string());
        return Err(DocsiftError::UnsupportedFormat(format!(
            "{} ({}): unrecognized file signature",
            path.display(),
            label
        )));
    }

    Ok(SniffedFormat {
        category,
        extension,
        detected_by: DetectedBy::Signature,
    })
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }

    match std::str::from_utf8(head) {
        Ok(_) => true,
        // Truncated multi-byte sequence at the cut point
        Err(e) if e.error_len().is_none() => true,
        Err(_) => {
            let control = head
                .iter()
                .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c))
                .count();
            control * 20 < head.len()
        }
    }
}
