//! Plain text and markdown reading with encoding detection.

use super::{NativeExtraction, NativeOutcome};
use crate::Result;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::path::Path;

/// Decoded text and the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    /// Some bytes could not be mapped and were replaced.
    pub lossy: bool,
}

/// Decode `bytes`, trying in order:
///
/// 1. the declared encoding label (e.g. `gbk`, `shift_jis`)
/// 2. a byte-order mark
/// 3. strict UTF-8
/// 4. the `chardetng` guess
/// 5. `windows-1252`, which maps every byte and therefore never fails
///
/// A step only wins if it decodes without errors, except the last.
pub fn decode_text(bytes: &[u8], declared_encoding: Option<&str>) -> DecodedText {
    if bytes.is_empty() {
        return DecodedText {
            text: String::new(),
            encoding: UTF_8.name(),
            lossy: false,
        };
    }

    if let Some(label) = declared_encoding {
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) => {
                let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
                if !had_errors {
                    return DecodedText {
                        text: decoded.into_owned(),
                        encoding: encoding.name(),
                        lossy: false,
                    };
                }
                tracing::debug!("Declared encoding {} failed to decode, detecting instead", encoding.name());
            }
            None => tracing::debug!("Unknown declared encoding label '{}'", label),
        }
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (decoded, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if !had_errors {
            return DecodedText {
                text: decoded.into_owned(),
                encoding: encoding.name(),
                lossy: false,
            };
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding: UTF_8.name(),
            lossy: false,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    let (decoded, had_errors) = guessed.decode_without_bom_handling(bytes);
    if !had_errors {
        return DecodedText {
            text: decoded.into_owned(),
            encoding: guessed.name(),
            lossy: false,
        };
    }

    tracing::debug!("Guessed encoding {} failed, decoding permissively", guessed.name());
    let (decoded, had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
    DecodedText {
        text: decoded.into_owned(),
        encoding: WINDOWS_1252.name(),
        lossy: had_errors,
    }
}

/// `charset` parameter of a declared MIME type such as `text/plain; charset=gbk`.
pub fn charset_from_declared(declared_type: Option<&str>) -> Option<&str> {
    declared_type?
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Read a plain text file.
pub async fn read_text_file(path: &Path, declared_encoding: Option<&str>) -> Result<NativeExtraction> {
    let bytes = tokio::fs::read(path).await?;
    let decoded = decode_text(&bytes, declared_encoding);

    if decoded.lossy {
        tracing::warn!("{} decoded with replacement characters", path.display());
    }

    Ok(NativeExtraction {
        outcome: NativeOutcome::from_result(Ok(decoded.text)),
        page_count: None,
        encoding: Some(decoded.encoding.to_string()),
    })
}
