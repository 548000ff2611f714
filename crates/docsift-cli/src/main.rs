//! `docsift` command-line interface.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsift::tasks::{InMemoryDocumentStore, TaskManager, open_store};
use docsift::{DocumentRef, ExtractionConfig, ExtractionOrchestrator, ProbeReport, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Document text extraction with garbled-text detection and OCR fallback.
#[derive(Parser, Debug)]
#[command(name = "docsift", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to a discovered docsift.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check which external engines are installed.
    Probe {
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration.
    Config {
        /// Read this file instead of the global --config / discovery.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Extract the text of one document.
    Extract {
        path: PathBuf,
        /// Declared type, e.g. `pdf` or `.docx`; overrides the file extension.
        #[arg(long = "type")]
        declared_type: Option<String>,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
        /// OCR languages, `+` or `,` separated (e.g. `eng+deu`).
        #[arg(long)]
        languages: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Probe { json } => {
            let config = load_config(cli.config.as_ref())?;
            let report = ProbeReport::run(&config).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_probe(&report);
            }
        }
        Commands::Config { file } => {
            let config = load_config(file.as_ref().or(cli.config.as_ref()))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Extract {
            path,
            declared_type,
            json,
            languages,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(languages) = languages {
                config.ocr.languages = parse_languages(&languages);
                config.validate().context("Invalid --languages")?;
            }
            extract(config, path, declared_type, json).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(file: Option<&PathBuf>) -> Result<ExtractionConfig> {
    let config = match file {
        Some(path) => {
            let mut config = ExtractionConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
        None => ExtractionConfig::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(['+', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_probe(report: &ProbeReport) {
    for (name, status) in [
        ("office converter", &report.converter),
        ("ocr engine", &report.ocr),
        ("pdf rasterizer", &report.pdf_renderer),
    ] {
        let state = if status.available { "available" } else { "unavailable" };
        let detail = status
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| status.detail.clone())
            .unwrap_or_default();
        println!("{:<18} {:<12} {}", name, state, detail);
    }
}

async fn extract(config: ExtractionConfig, path: PathBuf, declared_type: Option<String>, json: bool) -> Result<()> {
    if !path.exists() {
        bail!("No such file: {}", path.display());
    }

    let task_config = config.tasks.clone();
    let store = open_store(&task_config)?;
    let orchestrator = Arc::new(ExtractionOrchestrator::from_environment(config).await?);

    let document_id = path.display().to_string();
    let mut document = DocumentRef::new(document_id.clone(), path);
    if let Some(declared) = declared_type {
        document = document.with_declared_type(declared);
    }
    let documents = Arc::new(InMemoryDocumentStore::new());
    documents.insert(document);

    let manager = TaskManager::start(&task_config, orchestrator, documents, store);
    let task_id = manager.submit(&document_id)?;

    let mut last_progress = None;
    let task = loop {
        let task = manager.get_status(&task_id)?;
        if last_progress != Some(task.progress) {
            eprintln!("[{:>3}%] {}", task.progress, task.status);
            last_progress = Some(task.progress);
        }
        if task.status.is_terminal() {
            break task;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    manager.shutdown().await;

    if task.status == TaskStatus::Failed {
        bail!(
            "Extraction failed: {}",
            task.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let result = manager
        .get_result(&task_id)?
        .context("Task completed without a stored result")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        tracing::info!(
            "source {} | confidence {:.3} | pages {}",
            result.source,
            result.confidence,
            result
                .page_count
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        println!("{}", result.final_text);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_arguments() {
        let cli = Cli::try_parse_from([
            "docsift",
            "extract",
            "scan.pdf",
            "--type",
            ".pdf",
            "--languages",
            "eng+deu",
            "--json",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Extract {
                path,
                declared_type,
                json,
                languages,
            } => {
                assert_eq!(path, PathBuf::from("scan.pdf"));
                assert_eq!(declared_type.as_deref(), Some(".pdf"));
                assert!(json);
                assert_eq!(parse_languages(&languages.unwrap()), vec!["eng", "deu"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_language_list_separators() {
        assert_eq!(parse_languages("chi_sim, eng"), vec!["chi_sim", "eng"]);
        assert_eq!(parse_languages("eng++"), vec!["eng"]);
        assert!(parse_languages("").is_empty());
    }

    #[test]
    fn test_config_file_must_exist() {
        let missing = PathBuf::from("/nonexistent/docsift.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsift.toml");
        std::fs::write(&path, "[garbled]\nthreshold = 0.5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.garbled.threshold, 0.5);
    }
}
