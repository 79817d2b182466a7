//! CLI binary for edgequake-figdesc.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParseConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_figdesc::{
    parse, parse_directory, write_markdown, DescriptionMode, ParseConfig,
    ParseProgressCallback, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per region. Regions finish out of
/// order, so lines name the image rather than a position.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_parse_start` reports the region count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Analysing");
        bar.set_message("Waiting for layout analysis…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} regions  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_parse_start(&self, total_regions: usize) {
        self.activate_bar(total_regions);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_regions} figure regions to describe…"))
        ));
    }

    fn on_region_start(&self, page_number: u32, _total_regions: usize) {
        self.bar.set_message(format!("page {page_number}"));
    }

    fn on_region_complete(&self, image_name: &str, _total_regions: usize, described: bool) {
        let mark = if described { green("✓") } else { dim("–") };
        let note = if described { "" } else { "  no description" };
        self.bar
            .println(format!("  {} {}{}", mark, image_name, dim(note)));
        self.bar.inc(1);
    }

    fn on_region_error(&self, page_number: u32, _total_regions: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} page {:>3}  {}",
            red("✗"),
            page_number,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_parse_complete(&self, total_regions: usize, described: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors == 0 {
            eprintln!(
                "{} {}/{} regions described",
                green("✔"),
                bold(&described.to_string()),
                total_regions
            );
        } else {
            eprintln!(
                "{} {}/{} regions described  ({} errors)",
                cyan("⚠"),
                bold(&described.to_string()),
                total_regions,
                red(&errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Describe every figure, write report/output/report.md
  figdesc report.pdf

  # Explicit output, overwrite if present
  figdesc report.pdf -o report.md --overwrite

  # One prompt per image instead of classify-then-describe
  figdesc --mode direct report.pdf

  # Extract figure images only, no model calls
  figdesc --no-describe report.pdf

  # Every PDF in a directory, 2 files at a time
  figdesc ./papers -o ./papers-md --file-concurrency 2

  # JSON output (markdown, title, images, per-region outcomes, stats)
  figdesc --json report.pdf > report.json

ENVIRONMENT VARIABLES:
  DOCINTEL_ENDPOINT       Layout analysis endpoint (or AZURE_FORM_RECOGNIZER_ENDPOINT)
  DOCINTEL_KEY            Layout analysis key (or AZURE_FORM_RECOGNIZER_KEY)
  DOCINTEL_API_VERSION    Layout analysis API version (default 2024-11-30)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

CACHING:
  The layout analysis is cached as <doc dir>/<stem>.analysis.json and every
  region description as <image dir>/<image stem>.analysis.json. Reruns reuse
  both; pass --no-cache to ignore and skip writing them.
"#;

/// Describe the figures of a PDF with Vision LLMs and splice the descriptions into its Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "figdesc",
    version,
    about = "Describe PDF figures with Vision LLMs and splice the descriptions into the Markdown",
    long_about = "Analyse a PDF's layout, cut every figure region out of its page, describe \
each with a Vision Language Model and replace the figure in the Markdown with the description. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file, or a directory of PDFs.
    input: PathBuf,

    /// Output Markdown file (directory in batch mode).
    /// Default: <doc dir>/output/<stem>.md.
    #[arg(short, long, env = "FIGDESC_OUTPUT")]
    output: Option<PathBuf>,

    /// Replace an existing output file.
    #[arg(long, env = "FIGDESC_OVERWRITE")]
    overwrite: bool,

    /// Print the Markdown to stdout instead of writing a file.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,

    /// Description mode: iterative (classify, then specialise) or direct.
    #[arg(long, env = "FIGDESC_MODE", value_enum, default_value = "iterative")]
    mode: ModeArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of regions described at once. Default: CPU count + 4, max 32.
    #[arg(short, long, env = "FIGDESC_CONCURRENCY")]
    concurrency: Option<usize>,

    /// PDFs processed at once in directory mode.
    #[arg(long, env = "FIGDESC_FILE_CONCURRENCY", default_value_t = 4)]
    file_concurrency: usize,

    /// Attempts per model call, first try included.
    #[arg(long, env = "FIGDESC_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Region render magnification (1–8).
    #[arg(long, env = "FIGDESC_SCALE", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=8))]
    scale: u32,

    /// Directory for extracted images and region caches. Default: <doc dir>/images.
    #[arg(long, env = "FIGDESC_IMAGE_DIR")]
    image_dir: Option<PathBuf>,

    /// Do not write extracted region images.
    #[arg(long, env = "FIGDESC_NO_SAVE_IMAGES")]
    no_save_images: bool,

    /// Extract regions only; no model calls.
    #[arg(long, env = "FIGDESC_NO_DESCRIBE")]
    no_describe: bool,

    /// Neither read nor write analysis and description caches.
    #[arg(long, env = "FIGDESC_NO_CACHE")]
    no_cache: bool,

    /// Max LLM output tokens per call.
    #[arg(long, env = "FIGDESC_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FIGDESC_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FIGDESC_PASSWORD")]
    password: Option<String>,

    /// Layout analysis endpoint.
    #[arg(long, env = "DOCINTEL_ENDPOINT")]
    docintel_endpoint: Option<String>,

    /// Layout analysis key.
    #[arg(long, env = "DOCINTEL_KEY", hide_env_values = true)]
    docintel_key: Option<String>,

    /// Seconds to wait for one layout analysis.
    #[arg(long, env = "FIGDESC_ANALYSIS_TIMEOUT", default_value_t = 600)]
    analysis_timeout: u64,

    /// Output structured JSON (ParseOutput) instead of Markdown.
    #[arg(long, env = "FIGDESC_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "FIGDESC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FIGDESC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FIGDESC_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Iterative,
    Direct,
}

impl From<ModeArg> for DescriptionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Iterative => DescriptionMode::Iterative,
            ModeArg::Direct => DescriptionMode::Direct,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let batch = cli.input.is_dir();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.stdout && !batch;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    if batch {
        return run_batch(&cli, &config).await;
    }

    // ── Resolve output ───────────────────────────────────────────────────
    let output_path = if cli.stdout || cli.json {
        None
    } else {
        let path = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input));
        check_output(&cli.input, &path, cli.overwrite)?;
        Some(path)
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let output = parse(&cli.input, &config)
        .await
        .with_context(|| format!("Failed to process '{}'", cli.input.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    match output_path {
        Some(ref path) => {
            write_markdown(path, &output.markdown)
                .await
                .context("Failed to write output")?;
            if !cli.quiet {
                let stats = &output.stats;
                eprintln!(
                    "{}  {}  {}/{} regions  {}ms  →  {}",
                    if stats.failed + stats.skipped == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    bold(&output.title),
                    stats.described,
                    stats.regions,
                    stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out  /  {} cached",
                    dim(&stats.total_input_tokens.to_string()),
                    dim(&stats.total_output_tokens.to_string()),
                    dim(&stats.cached.to_string()),
                );
            }
        }
        None => {
            print!("{}", output.markdown);
            if !output.markdown.ends_with('\n') {
                println!();
            }
        }
    }

    Ok(())
}

async fn run_batch(cli: &Cli, config: &ParseConfig) -> Result<()> {
    let out_dir = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.join("output"));
    let items = parse_directory(
        &cli.input,
        &out_dir,
        config,
        Some(cli.file_concurrency),
        cli.overwrite,
    )
        .await
        .with_context(|| format!("Failed to list '{}'", cli.input.display()))?;

    let mut failed = 0usize;
    for item in &items {
        match item.result {
            Ok(ref stats) => {
                if !cli.quiet {
                    eprintln!(
                        "  {} {}  {}/{} regions  →  {}",
                        green("✓"),
                        item.input.display(),
                        stats.described,
                        stats.regions,
                        dim(&item.output.display().to_string()),
                    );
                }
            }
            Err(ref e) => {
                failed += 1;
                eprintln!("  {} {}  {}", red("✗"), item.input.display(), red(&e.to_string()));
            }
        }
    }
    if !cli.quiet {
        eprintln!(
            "{} {}/{} files processed",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            items.len() - failed,
            items.len()
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed", items.len());
    }
    Ok(())
}

/// `<doc dir>/output/<stem>.md`.
fn default_output_path(input: &Path) -> PathBuf {
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    dir.join("output").join(format!("{stem}.md"))
}

fn check_output(input: &Path, output: &Path, overwrite: bool) -> Result<()> {
    let same = match (input.canonicalize(), output.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        anyhow::bail!("Output '{}' is the input file", output.display());
    }
    if output.exists() && !overwrite {
        anyhow::bail!(
            "Output '{}' already exists. Pass --overwrite to replace it.",
            output.display()
        );
    }
    Ok(())
}

/// Map CLI args to `ParseConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParseConfig> {
    let mut builder = ParseConfig::builder()
        .mode(cli.mode.clone().into())
        .max_retries(cli.max_retries)
        .render_scale(cli.scale)
        .describe_images(!cli.no_describe)
        .save_images(!cli.no_save_images)
        .use_cache(!cli.no_cache)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .analysis_timeout_secs(cli.analysis_timeout);

    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref dir) = cli.image_dir {
        builder = builder.image_dir(dir);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref endpoint) = cli.docintel_endpoint {
        builder = builder.docintel_endpoint(endpoint);
    }
    if let Some(ref key) = cli.docintel_key {
        builder = builder.docintel_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
