//! CLI binary for edgequake-figchunk.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `IngestConfig` and prints chunk records.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_figchunk::{
    ingest_with_analyzer, write_records, CachePolicy, ContentFormat, IngestConfig,
    IngestProgressCallback, ProgressCallback, RegionPolicy, StoredAnalysis,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per figure. Figures finish out of
/// order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, figure: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&figure))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_ingest_start(&self, total_figures: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} figures  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_figures as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Resolving {total_figures} figures…"))
        ));
    }

    fn on_figure_start(&self, figure: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(figure, Instant::now());
        }
        self.bar.set_message(format!("figure {figure}"));
    }

    fn on_figure_complete(&self, figure: usize, total: usize, description_len: usize) {
        let secs = self.elapsed_secs(figure);
        self.bar.println(format!(
            "  {} Figure {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            figure,
            total,
            dim(&format!("{description_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_figure_error(&self, figure: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(figure);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Figure {:>3}/{:<3}  {}  {}",
            red("✗"),
            figure,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_ingest_complete(&self, total_figures: usize, resolved: usize, chunks: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} figures described, {} chunks",
                green("✔"),
                bold(&resolved.to_string()),
                chunks
            );
        } else {
            eprintln!(
                "{} {}/{} figures described  ({} failed), {} chunks",
                if resolved == 0 { red("✘") } else { cyan("⚠") },
                bold(&resolved.to_string()),
                total_figures,
                red(&failed.to_string()),
                chunks,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Chunk records to stdout (JSON Lines)
  figchunk report.pdf --analysis report.analysis.json

  # Write chunk records to a file, artifacts to a custom folder
  figchunk report.pdf -a report.analysis.json -o chunks.jsonl -d ingestion/images

  # Multi-page TIFF scan; analyzer geometry already in pixels
  figchunk scan.tiff -a scan.analysis.json

  # Analyzer reported PDF geometry in points instead of inches
  figchunk report.pdf -a report.json --pdf-unit-scale 1

  # Recompute every crop and description
  figchunk report.pdf -a report.json --cache-policy overwrite

  # Full structured output (chunks, figures, warnings, stats)
  figchunk --json report.pdf -a report.json > output.json

ARTIFACTS (under --output-folder):
  {doc}_init.md                     analyzer text before substitution
  {doc}.md                          text after substitution
  {doc}_cropped_image_{idx}.png     figure crop
  {doc}_cropped_image_{idx}.txt     figure description

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory); PDF input only
"#;

/// Replace document figures with VLM descriptions and split into chunks.
#[derive(Parser, Debug)]
#[command(
    name = "figchunk",
    version,
    about = "Replace document figures with VLM descriptions and split into retrieval chunks",
    long_about = "Crop every figure a layout analyzer found in a PDF or TIFF, describe it with a \
Vision Language Model, substitute the description for the figure marker, and split the result \
into header- and figure-aware chunks. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, \
and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local document path (PDF, TIFF, PNG, JPEG) or HTTP/HTTPS URL.
    input: String,

    /// Stored analyzer JSON for the document.
    #[arg(short, long, env = "FIGCHUNK_ANALYSIS")]
    analysis: PathBuf,

    /// Write chunk records (JSON Lines) to this file instead of stdout.
    #[arg(short, long, env = "FIGCHUNK_OUTPUT")]
    output: Option<PathBuf>,

    /// Folder for crops, descriptions and Markdown snapshots.
    #[arg(short = 'd', long, env = "FIGCHUNK_OUTPUT_FOLDER", default_value = "ingestion/images")]
    output_folder: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Analyzer model identifier passed to the analysis collaborator.
    #[arg(long, env = "FIGCHUNK_ANALYZER_MODEL", default_value = "prebuilt-layout")]
    analyzer_model: String,

    /// PDF page rendering DPI before cropping (72–600).
    #[arg(long, env = "FIGCHUNK_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Multiplier from analyzer PDF units to points (72 for inches).
    #[arg(long, env = "FIGCHUNK_PDF_UNIT_SCALE", default_value_t = 72.0)]
    pdf_unit_scale: f32,

    /// Number of figures described concurrently.
    #[arg(short, long, env = "FIGCHUNK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Reuse cached crops/descriptions or recompute them.
    #[arg(long, env = "FIGCHUNK_CACHE_POLICY", value_enum, default_value = "reuse")]
    cache_policy: CacheArg,

    /// How figures with several regions are described.
    #[arg(long, env = "FIGCHUNK_REGION_POLICY", value_enum, default_value = "concatenate")]
    region_policy: RegionArg,

    /// Keep <figure> tags around substituted descriptions.
    #[arg(long, env = "FIGCHUNK_KEEP_FIGURE_TAGS")]
    keep_figure_tags: bool,

    /// Deepest header level that starts a new section (1–8).
    #[arg(long, env = "FIGCHUNK_MAX_HEADER_LEVEL", default_value_t = 8,
          value_parser = clap::value_parser!(u8).range(1..=8))]
    max_header_level: u8,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FIGCHUNK_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "FIGCHUNK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per description.
    #[arg(long, env = "FIGCHUNK_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FIGCHUNK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per description on LLM failure.
    #[arg(long, env = "FIGCHUNK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Output structured JSON (IngestOutput) instead of JSON Lines records.
    #[arg(long, env = "FIGCHUNK_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "FIGCHUNK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FIGCHUNK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FIGCHUNK_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FIGCHUNK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Timeout in seconds for one figure's description calls together (0 disables).
    #[arg(long, env = "FIGCHUNK_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CacheArg {
    Reuse,
    Overwrite,
}

impl From<CacheArg> for CachePolicy {
    fn from(v: CacheArg) -> Self {
        match v {
            CacheArg::Reuse => CachePolicy::Reuse,
            CacheArg::Overwrite => CachePolicy::Overwrite,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum RegionArg {
    Concatenate,
    Composite,
}

impl From<RegionArg> for RegionPolicy {
    fn from(v: RegionArg) -> Self {
        match v {
            RegionArg::Concatenate => RegionPolicy::Concatenate,
            RegionArg::Composite => RegionPolicy::Composite,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run ingestion ────────────────────────────────────────────────────
    let analyzer = StoredAnalysis::new(&cli.analysis);
    let output = ingest_with_analyzer(
        &cli.input,
        &analyzer,
        ContentFormat::Markdown,
        &cli.analyzer_model,
        &config,
    )
    .await
    .context("Ingestion failed")?;

    if let Some(ref output_path) = cli.output {
        write_records(&output, output_path)
            .await
            .context("Failed to write chunk records")?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            writeln!(handle, "{json}").context("Failed to write to stdout")?;
        } else {
            for record in output.records() {
                let line = serde_json::to_string(&record).context("Failed to serialise chunk")?;
                writeln!(handle, "{line}").context("Failed to write to stdout")?;
            }
        }
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        for warning in &output.warnings {
            eprintln!("  {} {}", cyan("⚠"), warning);
        }
        let stats = &output.stats;
        let target = cli
            .output
            .as_ref()
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default();
        eprintln!(
            "{}  {}/{} figures  {} chunks  {}ms{}",
            if stats.failed_figures == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.resolved_figures,
            stats.total_figures,
            stats.chunks,
            stats.total_duration_ms,
            target,
        );
        eprintln!(
            "   {} cached  /  {} description calls",
            dim(&stats.cached_figures.to_string()),
            dim(&stats.describe_calls.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `IngestConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .output_folder(&cli.output_folder)
        .crop_dpi(cli.dpi)
        .pdf_unit_scale(cli.pdf_unit_scale)
        .concurrency(cli.concurrency)
        .cache_policy(cli.cache_policy.clone().into())
        .region_policy(cli.region_policy.clone().into())
        .keep_figure_tags(cli.keep_figure_tags)
        .max_header_level(cli.max_header_level)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
