//! Headless office conversion through LibreOffice.
//!
//! Office documents (doc/docx/xls/xlsx/ppt/pptx and friends) are handed to
//! `soffice --headless --convert-to <format>` and the intermediate file re-enters
//! the native readers.
//!
//! # System Requirement
//!
//! LibreOffice must be installed:
//! - **macOS**: `brew install --cask libreoffice`
//! - **Linux**: `apt install libreoffice` or `dnf install libreoffice`
//! - **Windows**: `winget install LibreOffice.LibreOffice`
//!
//! # Example
//!
//! ```rust,no_run
//! use docsift::extraction::libreoffice::{LibreOfficeConverter, OfficeConverter};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> docsift::Result<()> {
//! let converter = LibreOfficeConverter::new(None);
//! let converted = converter
//!     .convert(Path::new("minutes.docx"), "pdf", Duration::from_secs(60))
//!     .await?;
//! println!("Converted to {}", converted.path().display());
//! # Ok(())
//! # }
//! ```

use crate::core::binaries::{self, ExternalTool};
use crate::core::config::ConverterConfig;
use crate::error::{DocsiftError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// File produced by a conversion.
///
/// Owns the scratch directory it lives in; dropping it removes the file.
#[derive(Debug)]
pub struct ConvertedDocument {
    path: PathBuf,
    _workdir: Option<tempfile::TempDir>,
}

impl ConvertedDocument {
    pub fn in_workdir(path: PathBuf, workdir: tempfile::TempDir) -> Self {
        Self {
            path,
            _workdir: Some(workdir),
        }
    }

    /// A converted file whose lifetime the caller manages.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _workdir: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// External document converter.
#[async_trait]
pub trait OfficeConverter: Send + Sync {
    /// Convert `input` to `target_format` (an extension such as `pdf` or `xlsx`).
    ///
    /// # Errors
    ///
    /// - `ConverterUnavailable` when the converter binary is missing or not executable
    /// - `ConversionTimeout` when the process runs longer than `timeout`
    /// - `Parsing` when the converter ran but produced nothing usable
    async fn convert(&self, input: &Path, target_format: &str, timeout: Duration) -> Result<ConvertedDocument>;
}

/// [`OfficeConverter`] backed by `soffice`.
#[derive(Debug, Clone, Default)]
pub struct LibreOfficeConverter {
    configured_path: Option<PathBuf>,
}

impl LibreOfficeConverter {
    pub fn new(configured_path: Option<PathBuf>) -> Self {
        Self { configured_path }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.soffice_path.clone())
    }

    /// Path of the `soffice` executable that will be used.
    pub fn locate(&self) -> Result<PathBuf> {
        binaries::locate(ExternalTool::Soffice, self.configured_path.as_deref())
            .ok_or_else(|| DocsiftError::ConverterUnavailable(ExternalTool::Soffice.install_hint()))
    }

    /// Run `soffice --version` to make sure the binary actually works.
    pub async fn check_available(&self) -> Result<PathBuf> {
        let soffice_path = self.locate()?;

        let result = Command::new(&soffice_path)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => Ok(soffice_path),
            Ok(_) => Err(DocsiftError::ConverterUnavailable(format!(
                "LibreOffice executable '{}' responded with a failure when checking '--version'",
                soffice_path.display()
            ))),
            Err(err) => Err(DocsiftError::ConverterUnavailable(format!(
                "LibreOffice executable '{}' could not be executed: {}. {}",
                soffice_path.display(),
                err,
                ExternalTool::Soffice.install_hint()
            ))),
        }
    }
}

#[async_trait]
impl OfficeConverter for LibreOfficeConverter {
    async fn convert(&self, input: &Path, target_format: &str, timeout: Duration) -> Result<ConvertedDocument> {
        let soffice_path = self.locate()?;

        let workdir = tempfile::Builder::new().prefix("docsift-convert-").tempdir()?;
        // Separate profile per run so concurrent conversions don't fight over the lock file
        let profile_url = format!("-env:UserInstallation=file://{}", workdir.path().join("profile").display());

        let child = Command::new(&soffice_path)
            .arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(profile_url)
            .arg("--convert-to")
            .arg(target_format)
            .arg("--outdir")
            .arg(workdir.path())
            .arg(input)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    DocsiftError::ConverterUnavailable(format!(
                        "Failed to execute LibreOffice at '{}': {}",
                        soffice_path.display(),
                        e
                    ))
                }
                _ => DocsiftError::Io(e),
            })?;

        let child_id = child.id();

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DocsiftError::parsing(format!("Failed to wait for LibreOffice: {}", e)));
            }
            Err(_) => {
                // Dropping the wait future drops the child, which kills it
                tracing::warn!(
                    "LibreOffice conversion of {} timed out after {:?} (PID: {:?})",
                    input.display(),
                    timeout,
                    child_id
                );
                return Err(DocsiftError::ConversionTimeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(DocsiftError::parsing(format!(
                "LibreOffice conversion failed with return code {}: {}",
                output.status.code().unwrap_or(-1),
                if !stderr.trim().is_empty() { stderr } else { stdout }
            )));
        }

        let input_stem = input
            .file_stem()
            .ok_or_else(|| DocsiftError::parsing("Invalid input file name"))?;
        let expected_output = workdir
            .path()
            .join(format!("{}.{}", input_stem.to_string_lossy(), target_format));

        let metadata = tokio::fs::metadata(&expected_output).await.map_err(|e| {
            DocsiftError::parsing(format!(
                "LibreOffice conversion completed but output file not found: {}",
                e
            ))
        })?;

        if metadata.len() == 0 {
            return Err(DocsiftError::parsing("LibreOffice conversion produced empty file"));
        }

        tracing::debug!(
            "Converted {} to {} ({} bytes)",
            input.display(),
            target_format,
            metadata.len()
        );

        Ok(ConvertedDocument::in_workdir(expected_output, workdir))
    }
}
