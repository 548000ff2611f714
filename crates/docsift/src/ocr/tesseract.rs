//! OCR through the `tesseract` command-line tool.
//!
//! Each page image is written to a scratch PNG and recognized with
//! `tesseract <png> stdout -l <langs> --psm <n> --dpi <n>`. The child process is
//! killed when the recognition future is dropped, so a caller-side timeout
//! never leaves a stray process behind.

use crate::core::binaries::{self, ExternalTool};
use crate::core::config::OcrConfig;
use crate::error::{DocsiftError, Result};
use async_trait::async_trait;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Text recognizer for one image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize the text in `image` using the combined `languages`.
    ///
    /// # Errors
    ///
    /// - `OcrEngineUnavailable` when the engine or its language data is missing
    /// - `Ocr` when the engine ran but failed on this image
    async fn recognize(&self, image: &DynamicImage, languages: &[String]) -> Result<String>;
}

/// [`OcrEngine`] backed by the tesseract executable.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    configured_path: Option<PathBuf>,
    psm: u8,
    dpi: i32,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

impl TesseractCli {
    pub fn new(configured_path: Option<PathBuf>, psm: u8, dpi: i32) -> Self {
        Self {
            configured_path,
            psm,
            dpi,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.tesseract_path.clone(), config.psm, config.dpi)
    }

    pub fn locate(&self) -> Result<PathBuf> {
        binaries::locate(ExternalTool::Tesseract, self.configured_path.as_deref())
            .ok_or_else(|| DocsiftError::OcrEngineUnavailable(ExternalTool::Tesseract.install_hint()))
    }

    /// Check that tesseract runs and has data for every language in `languages`.
    pub async fn probe(&self, languages: &[String]) -> Result<PathBuf> {
        let tesseract_path = self.locate()?;

        let version = Command::new(&tesseract_path)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| unavailable(&tesseract_path, e))?;
        if !version.status.success() {
            return Err(DocsiftError::OcrEngineUnavailable(format!(
                "Tesseract executable '{}' responded with a failure when checking '--version'",
                tesseract_path.display()
            )));
        }

        let listing = Command::new(&tesseract_path)
            .arg("--list-langs")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| unavailable(&tesseract_path, e))?;

        // Older releases print the list on stderr
        let mut combined = String::from_utf8_lossy(&listing.stdout).into_owned();
        combined.push('\n');
        combined.push_str(&String::from_utf8_lossy(&listing.stderr));
        let installed = parse_language_list(&combined);

        let missing: Vec<&str> = languages
            .iter()
            .map(String::as_str)
            .filter(|lang| !installed.iter().any(|i| i == lang))
            .collect();

        if !missing.is_empty() {
            return Err(DocsiftError::OcrEngineUnavailable(format!(
                "Tesseract language data missing for: {}. Install the matching tessdata packages (e.g. `apt install tesseract-ocr-{}`)",
                missing.join(", "),
                missing[0].replace('_', "-")
            )));
        }

        Ok(tesseract_path)
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, image: &DynamicImage, languages: &[String]) -> Result<String> {
        if languages.is_empty() {
            return Err(DocsiftError::validation("At least one OCR language is required"));
        }
        let tesseract_path = self.locate()?;

        let owned = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&owned))
            .await
            .map_err(|e| DocsiftError::Other(format!("Image encoding task failed: {}", e)))??;

        let scratch = tempfile::Builder::new()
            .prefix("docsift-ocr-")
            .suffix(".png")
            .tempfile()?;
        tokio::fs::write(scratch.path(), &png).await?;

        let output = Command::new(&tesseract_path)
            .arg(scratch.path())
            .arg("stdout")
            .arg("-l")
            .arg(languages.join("+"))
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("--dpi")
            .arg(self.dpi.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    unavailable(&tesseract_path, e)
                }
                _ => DocsiftError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_language_data(&stderr) {
                return Err(DocsiftError::OcrEngineUnavailable(format!(
                    "Tesseract language data missing for '{}': {}",
                    languages.join("+"),
                    stderr.trim()
                )));
            }
            return Err(DocsiftError::ocr(format!(
                "Tesseract failed with return code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(strip_control_characters(&text).trim().to_string())
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> DocsiftError {
    DocsiftError::OcrEngineUnavailable(format!(
        "Tesseract executable '{}' could not be executed: {}. {}",
        path.display(),
        err,
        ExternalTool::Tesseract.install_hint()
    ))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| DocsiftError::ocr_with_source("Failed to encode page image", e))?;
    Ok(buffer)
}

/// Language codes from `tesseract --list-langs` output.
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !line.contains(' '))
        .map(str::to_string)
        .collect()
}

fn is_missing_language_data(stderr: &str) -> bool {
    stderr.contains("Failed loading language") || stderr.contains("Error opening data file")
}

fn strip_control_characters(text: &str) -> String {
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        text.chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
            .collect()
    } else {
        text.to_string()
    }
}
