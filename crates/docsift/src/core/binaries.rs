//! Locating the external executables the pipeline shells out to.
//!
//! Search order for every tool:
//! 1. the path from configuration
//! 2. tool-specific environment variables
//! 3. well-known install locations for the platform
//! 4. every directory on `PATH`

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// External executable used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    /// LibreOffice headless converter.
    Soffice,
    Tesseract,
}

impl ExternalTool {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Soffice => "LibreOffice (soffice)",
            Self::Tesseract => "Tesseract OCR",
        }
    }

    fn executable_names(self) -> &'static [&'static str] {
        match self {
            Self::Soffice => &["soffice", "libreoffice", "soffice.exe", "libreoffice.exe"],
            Self::Tesseract => &["tesseract", "tesseract.exe"],
        }
    }

    fn env_vars(self) -> &'static [&'static str] {
        match self {
            Self::Soffice => &["DOCSIFT_SOFFICE_PATH", "SOFFICE_PATH", "LIBREOFFICE_PATH"],
            Self::Tesseract => &["DOCSIFT_TESSERACT_PATH", "TESSERACT_PATH"],
        }
    }

    fn install_locations(self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        match self {
            Self::Soffice => {
                if cfg!(target_os = "macos") {
                    paths.push(PathBuf::from("/Applications/LibreOffice.app/Contents/MacOS/soffice"));
                    paths.push(PathBuf::from("/Applications/LibreOffice.app/Contents/MacOS/libreoffice"));
                }
                if cfg!(target_os = "windows") {
                    paths.push(PathBuf::from("C:\\Program Files\\LibreOffice\\program\\soffice.exe"));
                }
                if cfg!(target_os = "linux") {
                    paths.push(PathBuf::from("/usr/lib/libreoffice/program/soffice"));
                    paths.push(PathBuf::from("/opt/libreoffice/program/soffice"));
                }
            }
            Self::Tesseract => {
                if cfg!(target_os = "macos") {
                    paths.push(PathBuf::from("/opt/homebrew/bin/tesseract"));
                    paths.push(PathBuf::from("/usr/local/bin/tesseract"));
                }
                if cfg!(target_os = "windows") {
                    paths.push(PathBuf::from("C:\\Program Files\\Tesseract-OCR\\tesseract.exe"));
                }
            }
        }

        if let Some(prefix) = env::var_os("HOMEBREW_PREFIX") {
            let prefix = PathBuf::from(prefix);
            for name in self.executable_names() {
                paths.push(prefix.join("bin").join(name));
            }
        }

        paths
    }

    /// Actionable message for operators when the tool cannot be found.
    pub fn install_hint(self) -> String {
        match self {
            Self::Soffice => "LibreOffice is required to convert office documents. \
Install: macOS: 'brew install --cask libreoffice', Linux: 'apt install libreoffice', \
Windows: 'winget install LibreOffice.LibreOffice'. \
For a custom location set DOCSIFT_SOFFICE_PATH to the soffice executable."
                .to_string(),
            Self::Tesseract => "Tesseract is required for OCR. \
Install: macOS: 'brew install tesseract tesseract-lang', \
Linux: 'apt install tesseract-ocr tesseract-ocr-chi-sim', \
Windows: 'winget install UB-Mannheim.TesseractOCR'. \
For a custom location set DOCSIFT_TESSERACT_PATH to the tesseract executable."
                .to_string(),
        }
    }
}

/// Ordered, de-duplicated list of places to look for `tool`.
pub fn candidates(tool: ExternalTool, configured: Option<&Path>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let mut push_candidate = |path: PathBuf| {
        if seen.insert(path.clone()) {
            candidates.push(path);
        }
    };

    if let Some(path) = configured {
        push_candidate(path.to_path_buf());
    }

    for var in tool.env_vars() {
        if let Some(value) = env::var_os(var).filter(|v| !v.is_empty()) {
            push_candidate(PathBuf::from(value));
        }
    }

    for path in tool.install_locations() {
        push_candidate(path);
    }

    if let Some(path_env) = env::var_os("PATH") {
        for dir in env::split_paths(&path_env) {
            for name in tool.executable_names() {
                push_candidate(dir.join(name));
            }
        }
    }

    candidates
}

/// First existing regular file among [`candidates`].
pub fn locate(tool: ExternalTool, configured: Option<&Path>) -> Option<PathBuf> {
    candidates(tool, configured).into_iter().find(|candidate| {
        std::fs::metadata(candidate)
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    })
}
