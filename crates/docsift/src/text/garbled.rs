//! Garbled-text detection.
//!
//! Decides whether a blob produced by native extraction (or OCR) is real language
//! text or noise such as broken font mappings from a scanned or malformed PDF.
//!
//! Two tiers:
//! 1. a handful of regular expressions for well-known garbage signatures; any hit is
//!    garbled and the ratio tier is skipped
//! 2. the share of non-whitespace characters that are anomalous (control characters,
//!    U+FFFD, private-use code points, or letters from a script none of the configured
//!    OCR languages use), compared against the configured threshold
//!
//! # Example
//!
//! ```rust
//! use docsift::core::config::GarbledConfig;
//! use docsift::text::garbled::GarbledTextDetector;
//!
//! let detector = GarbledTextDetector::new(&GarbledConfig::default(), &["eng".to_string()]);
//!
//! let verdict = detector.detect("The board approved the annual budget on Monday.");
//! assert!(!verdict.is_garbled);
//!
//! let verdict = detector.detect("D3F G7H J2K L9M P4Q");
//! assert!(verdict.is_garbled);
//! ```

use crate::core::config::{ExtractionConfig, GarbledConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Runs of 3+ uppercase tokens that each mix letters and digits ("D3F G7H J2K").
static MIXED_TOKEN_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b[A-Z0-9]*(?:[A-Z][0-9]|[0-9][A-Z])[A-Z0-9]*(?:\s+[A-Z0-9]*(?:[A-Z][0-9]|[0-9][A-Z])[A-Z0-9]*){2,}\b",
    )
    .expect("Mixed token run regex pattern is valid and should compile")
});

// Letter-digit-letter triplets repeated, any case ("a3f-k9d-p2x").
static TRIPLET_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\b[A-Za-z][0-9][A-Za-z]\b[\s\-_./]*){3,}")
        .expect("Triplet run regex pattern is valid and should compile")
});

// UTF-8 decoded as Latin-1 ("Ã©Ã¨Ã ").
static MOJIBAKE_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[ÃÂ][\x{0080}-\x{00BF}]\s?){3,}").expect("Mojibake regex pattern is valid and should compile")
});

/// Fast-path signature that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GarbledPattern {
    MixedTokenRun,
    TripletRun,
    Mojibake,
}

/// Result of [`GarbledTextDetector::detect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarbledVerdict {
    pub is_garbled: bool,
    /// Anomalous share in `[0, 1]`; 1.0 for empty text and fast-path hits.
    pub ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<GarbledPattern>,
    /// Too little text to trust the verdict.
    pub inconclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Cjk,
    Kana,
    Hangul,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Devanagari,
    Thai,
    Armenian,
    Georgian,
}

fn scripts_for_language(code: &str) -> &'static [Script] {
    let base = code.split('_').next().unwrap_or(code);
    match base {
        "chi" | "zho" => &[Script::Cjk],
        "jpn" => &[Script::Cjk, Script::Kana],
        "kor" => &[Script::Cjk, Script::Hangul],
        "rus" | "ukr" | "bel" | "bul" | "srp" | "mkd" | "kaz" | "kir" | "mon" | "tgk" => &[Script::Cyrillic],
        "ell" | "grc" => &[Script::Greek],
        "ara" | "fas" | "urd" | "pus" | "uig" => &[Script::Arabic],
        "heb" | "yid" => &[Script::Hebrew],
        "hin" | "mar" | "san" | "nep" => &[Script::Devanagari],
        "tha" => &[Script::Thai],
        "hye" => &[Script::Armenian],
        "kat" => &[Script::Georgian],
        _ => &[],
    }
}

fn char_in_script(c: char, script: Script) -> bool {
    let cp = c as u32;
    match script {
        Script::Cjk => matches!(
            cp,
            0x3000..=0x303F
                | 0x3100..=0x312F
                | 0x31A0..=0x31BF
                | 0x3200..=0x32FF
                | 0x3400..=0x4DBF
                | 0x4E00..=0x9FFF
                | 0xF900..=0xFAFF
                | 0xFE30..=0xFE4F
                | 0xFF00..=0xFFEF
                | 0x20000..=0x2FA1F
        ),
        Script::Kana => matches!(cp, 0x3040..=0x30FF | 0x31F0..=0x31FF),
        Script::Hangul => matches!(cp, 0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF),
        Script::Cyrillic => matches!(cp, 0x0400..=0x052F),
        Script::Greek => matches!(cp, 0x0370..=0x03FF | 0x1F00..=0x1FFF),
        Script::Arabic => matches!(cp, 0x0600..=0x06FF | 0x0750..=0x077F | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF),
        Script::Hebrew => matches!(cp, 0x0590..=0x05FF | 0xFB1D..=0xFB4F),
        Script::Devanagari => matches!(cp, 0x0900..=0x097F),
        Script::Thai => matches!(cp, 0x0E00..=0x0E7F),
        Script::Armenian => matches!(cp, 0x0530..=0x058F),
        Script::Georgian => matches!(cp, 0x10A0..=0x10FF),
    }
}

/// Latin letters and the punctuation/symbol blocks any document may contain.
fn is_common_char(c: char) -> bool {
    let cp = c as u32;
    matches!(
        cp,
        0x0020..=0x007E
            | 0x00A0..=0x02FF
            | 0x0300..=0x036F
            | 0x1E00..=0x1EFF
            | 0x2000..=0x206F
            | 0x20A0..=0x20CF
            | 0x2100..=0x22FF
            | 0x2460..=0x24FF
            | 0x2500..=0x27BF
    )
}

fn is_intrinsically_anomalous(c: char) -> bool {
    let cp = c as u32;
    (c.is_control() && !c.is_whitespace())
        || c == char::REPLACEMENT_CHARACTER
        || matches!(cp, 0xE000..=0xF8FF | 0xF0000..=0xFFFFD | 0x100000..=0x10FFFD)
}

/// Heuristic classifier for "real text or noise".
///
/// Stateless after construction; the same input always yields the same verdict.
#[derive(Debug, Clone)]
pub struct GarbledTextDetector {
    threshold: f64,
    min_text_length: usize,
    scripts: Vec<Script>,
}

impl GarbledTextDetector {
    /// `languages` are OCR language codes; they decide which non-Latin scripts count as expected.
    pub fn new(config: &GarbledConfig, languages: &[String]) -> Self {
        let mut scripts = Vec::new();
        for language in languages {
            for script in scripts_for_language(language) {
                if !scripts.contains(script) {
                    scripts.push(*script);
                }
            }
        }

        Self {
            threshold: config.threshold,
            min_text_length: config.min_text_length,
            scripts,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(&config.garbled, &config.ocr.languages)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, text: &str) -> GarbledVerdict {
        let significant = text.chars().filter(|c| !c.is_whitespace()).count();

        if significant == 0 {
            return GarbledVerdict {
                is_garbled: true,
                ratio: 1.0,
                matched_pattern: None,
                inconclusive: false,
            };
        }

        let inconclusive = significant < self.min_text_length;

        if let Some(pattern) = Self::fast_path_match(text) {
            return GarbledVerdict {
                is_garbled: true,
                ratio: 1.0,
                matched_pattern: Some(pattern),
                inconclusive,
            };
        }

        let ratio = self.anomalous_ratio(text);

        GarbledVerdict {
            is_garbled: ratio >= self.threshold,
            ratio,
            matched_pattern: None,
            inconclusive,
        }
    }

    /// First garbage signature found in `text`, if any.
    pub fn fast_path_match(text: &str) -> Option<GarbledPattern> {
        if MIXED_TOKEN_RUN.is_match(text) {
            Some(GarbledPattern::MixedTokenRun)
        } else if TRIPLET_RUN.is_match(text) {
            Some(GarbledPattern::TripletRun)
        } else if MOJIBAKE_RUN.is_match(text) {
            Some(GarbledPattern::Mojibake)
        } else {
            None
        }
    }

    /// Share of non-whitespace characters that are anomalous; 1.0 when there are none.
    pub fn anomalous_ratio(&self, text: &str) -> f64 {
        let mut total = 0usize;
        let mut anomalous = 0usize;

        for c in text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if self.is_anomalous(c) {
                anomalous += 1;
            }
        }

        if total == 0 {
            return 1.0;
        }

        anomalous as f64 / total as f64
    }

    fn is_anomalous(&self, c: char) -> bool {
        if is_intrinsically_anomalous(c) {
            return true;
        }
        if is_common_char(c) {
            return false;
        }
        !self.scripts.iter().any(|script| char_in_script(c, *script))
    }
}
