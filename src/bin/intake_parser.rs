//! CLI binary for intake-parser.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! drives the pipeline, and prints records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use intake_parser::pipeline::input::check_caller_preconditions;
use intake_parser::{
    ExtractionProgressCallback, IntakePipeline, PatientRecord, PipelineConfig, ProgressCallback,
    RecordStore, DEFAULT_RECORDS_PATH,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while the PDF is rasterised, then a page bar
/// with one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>2}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, field_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>2}/{:<2}  {}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{field_count:>2} fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>2}/{:<2}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_document_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse a scanned intake form and store the record
  intake-parser parse scans/maria_gonzalez.pdf

  # Look at what would be stored without saving it
  intake-parser parse --dry-run --json form.pdf

  # List every stored record
  intake-parser list

  # Search by first or last name (case-insensitive substring)
  intake-parser search gonzalez

  # Use a different provider and records file
  intake-parser --provider openai --model gpt-4.1 --records clinic.json parse form.pdf

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (preferred when set)
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider override (with EDGEQUAKE_MODEL)
  EDGEQUAKE_MODEL         Model ID override
  PDFIUM_LIB_PATH         Path to libpdfium; the system library is used otherwise
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Parse scanned patient intake forms into structured records.
#[derive(Parser, Debug)]
#[command(
    name = "intake-parser",
    version,
    about = "Parse scanned patient intake forms (PDF) into structured records",
    long_about = "Rasterises each page of an intake-form PDF, reads it with a vision language \
model, merges the pages into one patient record and appends it to a JSON records file.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Records file (JSON array of patient records).
    #[arg(long, global = true, env = "INTAKE_RECORDS", default_value = DEFAULT_RECORDS_PATH)]
    records: PathBuf,

    /// Vision model ID (e.g. claude-sonnet-4-20250514, gpt-4.1).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page rendering scale factor (0.5–4.0).
    #[arg(long, global = true, env = "INTAKE_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Pages extracted concurrently.
    #[arg(short, long, global = true, env = "INTAKE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Retries per page on a failed vision call.
    #[arg(long, global = true, env = "INTAKE_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-page vision call timeout in seconds.
    #[arg(long, global = true, env = "INTAKE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Text file with a replacement extraction instruction.
    #[arg(long, global = true, env = "INTAKE_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "INTAKE_PASSWORD")]
    password: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "INTAKE_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "INTAKE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a patient record from a PDF form and store it.
    Parse {
        /// Path to the intake form PDF.
        pdf: PathBuf,

        /// Extract and print, but do not store the record.
        #[arg(long)]
        dry_run: bool,

        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show every stored record.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Find stored records by name (case-insensitive substring).
    Search {
        name: String,

        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn json(&self) -> bool {
        match self {
            Command::Parse { json, .. } | Command::List { json } | Command::Search { json, .. } => {
                *json
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `parse`.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.command.json()
        && matches!(cli.command, Command::Parse { .. });
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

    match cli.command {
        Command::Parse {
            ref pdf,
            dry_run,
            json,
        } => parse(&cli, pdf, dry_run, json, show_progress).await,
        Command::List { json } => {
            let records = RecordStore::new(&cli.records)
                .load()
                .await
                .context("Failed to load records")?;
            if records.is_empty() && !json {
                println!("No records yet. Parse a form first!");
                return Ok(());
            }
            print_records(&records, json, &format!("Found {} record(s):", records.len()))
        }
        Command::Search { ref name, json } => {
            let found = RecordStore::new(&cli.records)
                .find_by_name(name.trim())
                .await
                .context("Failed to search records")?;
            if found.is_empty() && !json {
                println!("No records matching '{}'.", name.trim());
                return Ok(());
            }
            print_records(
                &found,
                json,
                &format!("Found {} matching record(s):", found.len()),
            )
        }
    }
}

async fn parse(cli: &Cli, pdf: &Path, dry_run: bool, json: bool, show_progress: bool) -> Result<()> {
    // Users dragging a file into the terminal get it wrapped in quotes.
    let pdf = PathBuf::from(pdf.to_string_lossy().trim().trim_matches(['\'', '"']));
    check_caller_preconditions(&pdf).with_context(|| format!("Cannot parse {}", pdf.display()))?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress).await?;
    let pipeline = IntakePipeline::new(config).context("Failed to set up the vision provider")?;

    let record = if dry_run {
        pipeline.process(&pdf).await
    } else {
        pipeline.run(&pdf).await
    }
    .with_context(|| format!("Error processing form {}", pdf.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialise record")?
        );
    } else {
        println!("\nExtracted record:");
        print!("{}", render_record(&record, None));
    }

    if !cli.quiet {
        if dry_run {
            eprintln!("{} Dry run: record not saved", dim("•"));
        } else {
            eprintln!(
                "{} Record saved to {}",
                green("✔"),
                bold(&cli.records.display().to_string())
            );
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .scale(cli.scale)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .records_path(cli.records.clone());

    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.extraction_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_records(records: &[PatientRecord], json: bool, heading: &str) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(records).context("Failed to serialise records")?
        );
        return Ok(());
    }
    println!("\n {heading}");
    for (i, record) in records.iter().enumerate() {
        print!("{}", render_record(record, Some(i + 1)));
    }
    Ok(())
}

/// Boxed, dot-leader layout of a record; `source_file` is not shown.
fn render_record(record: &PatientRecord, index: Option<usize>) -> String {
    let rule = "=".repeat(40);
    let header = match index {
        Some(i) => format!("Patient #{i}"),
        None => "Patient Record".to_string(),
    };

    let mut out = format!("\n{rule}\n  {header}\n{rule}\n");
    for (label, value) in record.display_rows() {
        out.push_str(&format!("  {label:.<30} {value}\n"));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}
