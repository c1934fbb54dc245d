//! CLI binary for ledgerlens.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one pipeline and prints the JSON result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ledgerlens::categories::{catalogue, CategoryEntry};
use ledgerlens::output::{to_pretty_json, write_json, ErrorReport};
use ledgerlens::{
    ExtractError, ExtractionConfig, ExtractionProgress, ProgressCallback, ReceiptExtractor, Stage,
    StatementExtractor, StatementOutput,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner on stderr with one log line per finished stage.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(prefix: &str) -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let template = "{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}";
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        bar.set_message("reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgress for CliProgress {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), stage, dim(&msg)));
    }

    fn on_finished(&self, resolution: &str) {
        self.bar.finish_and_clear();
        let mark = if resolution == "error" { red("✘") } else { green("✔") };
        eprintln!("{mark} resolved via {resolution}");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Categorise a receipt photo
  ledgerlens receipt receipt.jpg

  # Receipt PDF, saving the JSON as well
  ledgerlens receipt scan.pdf --save receipt.json

  # Extract transactions from a bank statement
  ledgerlens statement march.pdf -s march.json

  # Print both category vocabularies
  ledgerlens categories

RESOLUTION ORDER (receipt):
  model           first response already had valid categories
  reprompt        a repair request fixed them
  local_fallback  merchant rules (walmart → groceries, uber → transportation, …)
  raw_text        the model answered without JSON
  local_ocr       the API produced nothing; tesseract output instead

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY     Google Gemini API key (else read from .env)
  LEDGERLENS_MODEL   Override model ID
  PDFIUM_LIB_PATH    Path to an existing libpdfium
  RUST_LOG           Override log filter
"#;

/// Extract receipts and bank statements into categorised JSON.
#[derive(Parser, Debug)]
#[command(
    name = "ledgerlens",
    version,
    about = "Extract receipts and bank statements into categorised JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Model resource name (e.g. gemini-2.5-pro, gemini-2.5-flash).
    #[arg(long, global = true, env = "LEDGERLENS_MODEL")]
    model: Option<String>,

    /// File with a GEMINI_API_KEY=... line, used when the env var is unset.
    #[arg(long, global = true, env = "LEDGERLENS_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Retries per model call on transient failures (timeout, 429, 5xx).
    #[arg(long, global = true, env = "LEDGERLENS_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LEDGERLENS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, global = true, env = "LEDGERLENS_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "LEDGERLENS_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and categorise a receipt image or PDF.
    Receipt {
        /// Receipt image (PNG, JPEG, WebP, GIF) or PDF.
        file: PathBuf,
        /// Also write the JSON output to this path.
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// Extract transactions from a bank statement PDF.
    Statement {
        /// Statement PDF (or an image of one page).
        file: PathBuf,
        /// Also write the JSON output to this path.
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// Print the income and expense category vocabularies.
    Categories,
}

#[derive(Serialize)]
struct CategoryListing {
    income: Vec<CategoryEntry>,
    expense: Vec<CategoryEntry>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active; the
    // per-stage lines provide the feedback that matters.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Categories => {
            let (income, expense): (Vec<_>, Vec<_>) = catalogue()
                .into_iter()
                .partition(|e| e.kind == ledgerlens::CategoryKind::Income);
            let listing = CategoryListing { income, expense };
            println!("{}", to_pretty_json(&listing)?);
        }
        Command::Receipt { file, save } => {
            let progress = show_progress.then(|| CliProgress::new("Receipt") as ProgressCallback);
            let config = build_config(&cli, progress)?;
            let extractor = match ReceiptExtractor::from_config(config) {
                Ok(extractor) => extractor,
                Err(ExtractError::MissingApiKey) => {
                    eprintln!("{}", ExtractError::MissingApiKey);
                    return Ok(());
                }
                Err(e) => return Err(e).context("Failed to set up receipt extraction"),
            };
            let output = extractor.extract(file).await;
            emit(&output, save.as_deref()).await?;
        }
        Command::Statement { file, save } => {
            let progress = show_progress.then(|| CliProgress::new("Statement") as ProgressCallback);
            let config = build_config(&cli, progress)?;
            let extractor = match StatementExtractor::from_config(config) {
                Ok(extractor) => extractor,
                Err(e @ ExtractError::MissingApiKey) => {
                    let output = StatementOutput::Failed(ErrorReport::new(e.to_string()));
                    println!("{}", to_pretty_json(&output)?);
                    return Ok(());
                }
                Err(e) => return Err(e).context("Failed to set up statement extraction"),
            };
            let output = extractor.extract(file).await;
            emit(&output, save.as_deref()).await?;
        }
    }

    Ok(())
}

/// Print pretty JSON to stdout and optionally save it.
async fn emit<T: Serialize>(output: &T, save: Option<&Path>) -> Result<()> {
    println!("{}", to_pretty_json(output)?);
    if let Some(path) = save {
        write_json(output, path)
            .await
            .with_context(|| format!("Failed to save output to {}", path.display()))?;
        eprintln!("Saved output to {}", path.display());
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .env_file(cli.env_file.clone())
        .max_retries(cli.max_retries);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
