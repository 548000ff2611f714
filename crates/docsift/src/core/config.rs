//! Configuration loading and management.
//!
//! [`ExtractionConfig`] is built once at startup (defaults, then an optional file,
//! then `DOCSIFT_*` environment overrides) and handed to the orchestrator and the
//! task manager. Nothing in the pipeline reads module-level settings.

use crate::{DocsiftError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the file [`ExtractionConfig::discover`] looks for.
pub const CONFIG_FILE_NAME: &str = "docsift.toml";

/// Main extraction configuration.
///
/// # Example
///
/// ```rust
/// use docsift::ExtractionConfig;
///
/// let config = ExtractionConfig::default();
/// assert_eq!(config.garbled.threshold, 0.3);
///
/// // let config = ExtractionConfig::from_toml_file("docsift.toml")?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub garbled: GarbledConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub converter: ConverterConfig,

    #[serde(default)]
    pub tasks: TaskConfig,
}

/// Garbled-text detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarbledConfig {
    /// Anomalous-character ratio at or above which text is garbled.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Non-whitespace characters below which a verdict is inconclusive.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
}

impl Default for GarbledConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_text_length: default_min_text_length(),
        }
    }
}

/// OCR fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit tesseract executable (None = discover).
    #[serde(default)]
    pub tesseract_path: Option<PathBuf>,

    /// Tesseract language codes, combined as `chi_sim+eng`.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Target render resolution for PDF pages.
    #[serde(default = "default_dpi")]
    pub dpi: i32,

    /// Wall-clock limit for one page's recognition.
    #[serde(default = "default_timeout_secs")]
    pub page_timeout_secs: u64,

    /// Tesseract page segmentation mode.
    #[serde(default = "default_psm")]
    pub psm: u8,

    /// Grayscale, contrast and denoise before recognition.
    #[serde(default = "default_true")]
    pub preprocess: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_path: None,
            languages: default_languages(),
            dpi: default_dpi(),
            page_timeout_secs: default_timeout_secs(),
            psm: default_psm(),
            preprocess: true,
        }
    }
}

impl OcrConfig {
    /// Language argument in tesseract's `a+b` form.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }
}

/// Headless office converter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub soffice_path: Option<PathBuf>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            soffice_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Worker pool and task persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Concurrent extractions (and therefore concurrent converter/OCR processes).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Directory for persisted task records (None = in memory only).
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            store_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.3
}

fn default_min_text_length() -> usize {
    20
}

fn default_languages() -> Vec<String> {
    vec!["chi_sim".to_string(), "eng".to_string()]
}

fn default_dpi() -> i32 {
    300
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_psm() -> u8 {
    3
}

fn default_workers() -> usize {
    num_cpus::get().clamp(2, 4)
}

impl ExtractionConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        toml::from_str(&content)
            .map_err(|e| DocsiftError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        serde_yaml_ng::from_str(&content)
            .map_err(|e| DocsiftError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        serde_json::from_str(&content)
            .map_err(|e| DocsiftError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration, picking the parser from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "toml" => Self::from_toml_file(path),
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            other => Err(DocsiftError::validation(format!(
                "Unsupported config file extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Discover configuration file in parent directories.
    ///
    /// Searches for `docsift.toml` in current directory and parent directories.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(DocsiftError::Io)?;

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Apply `DOCSIFT_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_var("DOCSIFT_GARBLED_THRESHOLD") {
            self.garbled.threshold = parse_env("DOCSIFT_GARBLED_THRESHOLD", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_OCR_LANGUAGES") {
            self.ocr.languages = value
                .split(['+', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = env_var("DOCSIFT_OCR_ENABLED") {
            self.ocr.enabled = parse_bool("DOCSIFT_OCR_ENABLED", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_TESSERACT_PATH") {
            self.ocr.tesseract_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("DOCSIFT_SOFFICE_PATH") {
            self.converter.soffice_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("DOCSIFT_CONVERSION_TIMEOUT") {
            self.converter.timeout_secs = parse_env("DOCSIFT_CONVERSION_TIMEOUT", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_OCR_PAGE_TIMEOUT") {
            self.ocr.page_timeout_secs = parse_env("DOCSIFT_OCR_PAGE_TIMEOUT", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_OCR_DPI") {
            self.ocr.dpi = parse_env("DOCSIFT_OCR_DPI", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_WORKERS") {
            self.tasks.workers = parse_env("DOCSIFT_WORKERS", &value)?;
        }
        if let Some(value) = env_var("DOCSIFT_STORE_DIR") {
            self.tasks.store_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Defaults, then `docsift.toml` if one is discovered, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::discover()?.unwrap_or_default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.garbled.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(DocsiftError::validation(format!(
                "garbled.threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.tasks.workers == 0 {
            return Err(DocsiftError::validation("tasks.workers must be at least 1"));
        }

        if !(72..=600).contains(&self.ocr.dpi) {
            return Err(DocsiftError::validation(format!(
                "ocr.dpi must be between 72 and 600, got {}",
                self.ocr.dpi
            )));
        }

        if self.ocr.page_timeout_secs == 0 || self.converter.timeout_secs == 0 {
            return Err(DocsiftError::validation("timeouts must be greater than zero"));
        }

        if self.ocr.languages.is_empty() {
            return Err(DocsiftError::validation("ocr.languages must not be empty"));
        }

        if let Some(bad) = self.ocr.languages.iter().find(|l| !is_valid_language_code(l)) {
            return Err(DocsiftError::validation(format!("Invalid OCR language code '{}'", bad)));
        }

        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| DocsiftError::validation(format!("Failed to read config file {}: {}", path.display(), e)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DocsiftError::validation(format!("Invalid value for {}: '{}' ({})", name, value, e)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DocsiftError::validation(format!(
            "Invalid value for {}: '{}' (expected true/false)",
            name, value
        ))),
    }
}

/// Tesseract codes look like `eng`, `chi_sim`, `chi_tra_vert`.
fn is_valid_language_code(code: &str) -> bool {
    let mut parts = code.split('_');
    let Some(base) = parts.next() else {
        return false;
    };
    (3..=8).contains(&base.len())
        && base.chars().all(|c| c.is_ascii_lowercase())
        && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}
