//! CLI binary for edgequake-translate.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TranslationConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_translate::pipeline::input;
use edgequake_translate::{
    translate_directory, translate_file, translate_to_file, CancellationToken, PageSeparator,
    ProgressCallback, TranslationConfig, TranslationProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    degraded: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_document_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            degraded: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Translating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TranslationProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Translating {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times.lock().insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_degraded(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.degraded.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_rate_limit_wait(&self, provider: &str, wait: Duration) {
        self.bar.println(format!(
            "  {} {} rate limit, waiting {}s",
            yellow("⏸"),
            provider,
            wait.as_secs()
        ));
        self.bar.set_message(format!("rate limited ({}s)", wait.as_secs()));
    }

    fn on_document_complete(&self, total_pages: usize, translated_count: usize) {
        let failed = total_pages.saturating_sub(translated_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages translated",
                green("✔"),
                bold(&translated_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages translated  ({} degraded)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&translated_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Translate a text export to Japanese (stdout)
  pdftrans paper.txt

  # Translate a PDF to French, write to a file
  pdftrans --target-lang fr paper.pdf -o paper_fr.md

  # Translate every .pdf/.txt in a directory
  pdftrans ./papers --output-dir ./translated

  # Use Claude with fewer page attempts
  pdftrans --provider claude --max-attempts 3 paper.txt

  # Translate from URL
  pdftrans https://arxiv.org/pdf/1706.03762 -o attention_ja.md

  # Check that the API key works
  pdftrans --validate-key --provider openai

PROVIDERS:
  Provider     Default model
  ─────────    ──────────────────────────────
  gemini       gemini-2.5-flash-preview-05-20
  openai       gpt-4.1
  anthropic    claude-3-7-sonnet-20250219   (alias: claude)

INPUT:
  Pages are separated by form feeds (\f), as written by `pdftotext`.
  PDF inputs are converted with `pdftotext` (poppler-utils), which must
  be on PATH.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  PDFTRANS_PROVIDER       Override provider
  PDFTRANS_MODEL          Override model ID
  RUST_LOG                Log filter (overrides --verbose)
"#;

/// Translate extracted document pages to Markdown with LLM providers.
#[derive(Parser, Debug)]
#[command(
    name = "pdftrans",
    version,
    about = "Translate document pages to Markdown using LLMs",
    long_about = "Translate documents page by page (text exports, PDFs, URLs or whole \
directories) with OpenAI, Anthropic or Google Gemini. Rate limits, timeouts and encoding \
errors are retried; a page that still fails is kept as an error block with its source text.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file, directory, or HTTP/HTTPS URL.
    #[arg(required_unless_present = "validate_key")]
    input: Option<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PDFTRANS_OUTPUT")]
    output: Option<PathBuf>,

    /// Output directory for directory inputs (default: next to each input).
    #[arg(long, env = "PDFTRANS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Overwrite existing outputs in directory mode.
    #[arg(long)]
    force: bool,

    /// LLM provider: gemini, openai, anthropic, claude.
    #[arg(long, env = "PDFTRANS_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Model ID (default: the provider's default).
    #[arg(long, env = "PDFTRANS_MODEL")]
    model: Option<String>,

    /// API key (default: read from the provider's env var).
    #[arg(long, hide_env_values = true)]
    api_key: Option<String>,

    /// Endpoint override (proxies, gateways).
    #[arg(long, env = "PDFTRANS_BASE_URL")]
    base_url: Option<String>,

    /// Target language code or name (ja, fr, German, ...).
    #[arg(short = 't', long, env = "PDFTRANS_TARGET_LANG", default_value = "ja")]
    target_lang: String,

    /// Path to a text file with extra instructions appended to every prompt.
    #[arg(long, env = "PDFTRANS_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDFTRANS_SEPARATOR", default_value = "hr")]
    separator: String,

    /// Page-level attempts.
    #[arg(long, env = "PDFTRANS_MAX_ATTEMPTS", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..=20))]
    max_attempts: u32,

    /// Attempts per provider call inside one page attempt.
    #[arg(long, env = "PDFTRANS_CALL_ATTEMPTS", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..=20))]
    call_attempts: u32,

    /// Wall-clock ceiling for one page attempt, in seconds.
    #[arg(long, env = "PDFTRANS_WATCHDOG", default_value_t = 500)]
    watchdog_secs: u64,

    /// Per-HTTP-request timeout in seconds.
    #[arg(long, env = "PDFTRANS_TIMEOUT", default_value_t = 500)]
    timeout: u64,

    /// HTTP download timeout for URL inputs, in seconds.
    #[arg(long, env = "PDFTRANS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Stop retrying on 400/401/403/404/422 responses.
    #[arg(long)]
    fail_fast: bool,

    /// Only check that the API key is accepted, then exit.
    #[arg(long)]
    validate_key: bool,

    /// Output structured JSON instead of Markdown.
    #[arg(long, env = "PDFTRANS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFTRANS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFTRANS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFTRANS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
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

    // ── Key validation mode ──────────────────────────────────────────────
    if cli.validate_key {
        let config = build_config(&cli, None).await?;
        let provider = config
            .resolve_provider()
            .context("Provider is not configured")?;
        let name = provider.identity().name.clone();
        if provider.validate_credential().await {
            eprintln!("{} {} key accepted", green("✔"), bold(&name));
            return Ok(());
        }
        anyhow::bail!("{} rejected the API key", name);
    }

    let input_str = cli
        .input
        .clone()
        .context("An input file, directory or URL is required")?;

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    // Finishes the current page, then stops.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} stopping after the current page…", yellow("⏹"));
                cancel.cancel();
            }
        });
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn TranslationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Directory mode ───────────────────────────────────────────────────
    if !input::is_url(&input_str) && Path::new(&input_str).is_dir() {
        let report = translate_directory(&input_str, cli.output_dir.as_deref(), &config, &cancel)
            .await
            .context("Translation failed")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            for file in &report.files {
                let status = if file.skipped {
                    dim("skipped (exists)")
                } else if let Some(ref e) = file.error {
                    red(e)
                } else {
                    green("done")
                };
                eprintln!("  {}  →  {}  {}", file.input.display(), file.output.display(), status);
            }
            eprintln!(
                "{} processed, {} skipped, {} failed",
                bold(&report.processed().to_string()),
                report.skipped(),
                report.failed()
            );
        }
        if report.failed() > 0 {
            anyhow::bail!("{} file(s) failed", report.failed());
        }
        return Ok(());
    }

    // ── Single document ──────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = translate_to_file(&input_str, output_path, &config, &cancel)
            .await
            .context("Translation failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {} attempts  {}ms  →  {}",
                if stats.degraded_pages == 0 && !stats.cancelled {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.translated_pages,
                stats.total_pages,
                stats.total_attempts,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let output = translate_file(&input_str, &config, &cancel)
            .await
            .context("Translation failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
        }

        if !cli.quiet && !show_progress {
            eprintln!(
                "Translated {}/{} pages in {}ms",
                output.stats.translated_pages, output.stats.total_pages, output.stats.total_duration_ms
            );
            if output.stats.degraded_pages > 0 {
                eprintln!("  {} pages degraded", output.stats.degraded_pages);
            }
        }
        if output.stats.cancelled && !cli.quiet {
            eprintln!(
                "{} cancelled, {} page(s) not translated",
                yellow("⏹"),
                output.stats.skipped_pages
            );
        }
    }

    Ok(())
}

/// Map CLI args to `TranslationConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
) -> Result<TranslationConfig> {
    let mut builder = TranslationConfig::builder()
        .provider_name(&cli.provider)
        .target_language(&cli.target_lang)
        .page_separator(parse_separator(&cli.separator))
        .page_max_attempts(cli.max_attempts)
        .call_max_attempts(cli.call_attempts)
        .watchdog_secs(cli.watchdog_secs)
        .request_timeout_secs(cli.timeout)
        .download_timeout_secs(cli.download_timeout)
        .fail_fast_on_client_errors(cli.fail_fast)
        .force_overwrite(cli.force);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(ref path) = cli.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.custom_instructions(text);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
