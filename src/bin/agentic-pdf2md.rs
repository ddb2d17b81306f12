//! CLI binary for agentic-pdf2md.
//!
//! Maps flags onto `PdfSourceConfig`, `ProcessingConfig` and an `LlmAgent`,
//! drives a progress bar from the run's progress events, and turns Ctrl-C
//! into a cooperative cancellation so finished pages are still written.

use agentic_pdf2md::convert::write_atomic;
use agentic_pdf2md::{
    convert, inspect, CancellationSignal, ConvertOptions, DescribeImageTool, FailurePolicy,
    LlmAgent, PageSelection, PageSeparator, PdfSourceConfig, ProcessingConfig, Processor,
    ProgressEvent, ProgressReceiver, RunMode, RunStatus, SharedProgressSink, TaskPhase,
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parallel conversion to stdout
  agentic-pdf2md document.pdf

  # Serial mode: headings stay consistent across page breaks
  agentic-pdf2md --mode serial book.pdf -o book.md

  # Keep going past failed pages, stop after 10 minutes
  agentic-pdf2md --mode serial --continue-on-error --deadline 600 report.pdf

  # Pages 3-15, four in flight, table of contents on top
  agentic-pdf2md --pages 3-15 -c 4 --toc paper.pdf -o paper.md

  # Inspect PDF metadata (no API key needed)
  agentic-pdf2md --inspect-only document.pdf

CANCELLATION:
  Ctrl-C stops dispatching new pages. Pages already finished are kept and the
  partial document is still written, with placeholders for the rest.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing the pdfium shared library
"#;

/// Convert PDF files and URLs to Markdown with tool-using LLM agents.
#[derive(Parser, Debug)]
#[command(
    name = "agentic-pdf2md",
    version,
    about = "Convert PDF files and URLs to Markdown with tool-using LLM agents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Processing strategy.
    #[arg(long, env = "PDF2MD_MODE", value_enum, default_value = "parallel")]
    mode: ModeArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages in flight at once (parallel mode).
    #[arg(short, long, env = "PDF2MD_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Maximum agent invocations per page.
    #[arg(long, env = "PDF2MD_MAX_ITERATIONS", default_value_t = 8)]
    max_iterations: usize,

    /// Serial mode: record failed pages and continue instead of aborting.
    #[arg(long, env = "PDF2MD_CONTINUE_ON_ERROR")]
    continue_on_error: bool,

    /// Parallel mode: stop dispatching pages after the first failure.
    #[arg(long, env = "PDF2MD_FAIL_FAST")]
    fail_fast: bool,

    /// Overall time budget in seconds.
    #[arg(long, env = "PDF2MD_DEADLINE")]
    deadline: Option<u64>,

    /// Serial mode: also show the agent the end of the previous page.
    #[arg(long, env = "PDF2MD_CARRY_PREVIOUS_PAGE")]
    carry_previous_page: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2MD_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2MD_SEPARATOR", default_value = "none")]
    separator: String,

    /// Prepend a table of contents built from the headings found.
    #[arg(long, env = "PDF2MD_TOC")]
    toc: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Do not offer the describe_image tool (and skip image extraction).
    #[arg(long, env = "PDF2MD_NO_IMAGE_TOOL")]
    no_image_tool: bool,

    /// Max LLM output tokens per agent turn.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per agent invocation on provider failure.
    #[arg(long, env = "PDF2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the aggregated document and metadata as JSON.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Parallel,
    Serial,
}

impl From<ModeArg> for RunMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Parallel => RunMode::Parallel,
            ModeArg::Serial => RunMode::Serial,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            for (label, value) in [
                ("Title:", &meta.title),
                ("Author:", &meta.author),
                ("Subject:", &meta.subject),
                ("Producer:", &meta.producer),
                ("Creator:", &meta.creator),
            ] {
                if let Some(v) = value {
                    println!("{label:<14}{v}");
                }
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Agent and processor ──────────────────────────────────────────────
    let mut agent_builder = LlmAgent::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries);
    if let Some(ref p) = cli.provider {
        agent_builder = agent_builder.provider_name(p.clone());
    }
    if let Some(ref m) = cli.model {
        agent_builder = agent_builder.model(m.clone());
    }
    let agent = Arc::new(agent_builder.build().context("Failed to set up LLM provider")?);

    let mut processor = Processor::new(agent.clone());
    if !cli.no_image_tool {
        processor = processor.with_tool(Arc::new(DescribeImageTool::new(agent)));
    }

    // ── Cancellation ─────────────────────────────────────────────────────
    let signal = CancellationSignal::new();
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} cancelling; finished pages will be kept", yellow("⚠"));
                signal.request_cancel();
            }
        });
    }

    // ── Progress ─────────────────────────────────────────────────────────
    let (progress, bar_task) = if show_progress {
        let (sink, rx) = agentic_pdf2md::progress_channel();
        let sink: SharedProgressSink = Arc::new(sink);
        (Some(sink), Some(tokio::spawn(drive_progress_bar(rx))))
    } else {
        (None, None)
    };

    let options = build_options(&cli, signal, progress).await?;
    let result = convert(&cli.input, &processor, &options).await;

    // The options hold the last sink clone; dropping them ends the bar task.
    drop(options);
    finish_bar(bar_task).await;

    let output = result.context("Conversion failed")?;
    let doc = &output.document;

    // ── Output ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::json!({
            "metadata": output.metadata,
            "source_page_numbers": output.source_page_numbers,
            "document": doc,
        });
        let rendered = serde_json::to_string_pretty(&json).context("Failed to serialise output")?;
        match cli.output {
            Some(ref path) => write_atomic(path, &rendered).await?,
            None => println!("{rendered}"),
        }
    } else if let Some(ref path) = cli.output {
        write_atomic(path, &doc.markdown).await?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(doc.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !doc.markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        let s = &doc.stats;
        let (mark, label) = match &doc.status {
            RunStatus::Completed => (green("✔"), "completed".to_string()),
            RunStatus::PartiallyFailed => (yellow("⚠"), "partially failed".to_string()),
            RunStatus::Aborted(abort) => (red("✘"), abort.to_string()),
            RunStatus::Cancelled => (yellow("⚠"), "cancelled".to_string()),
        };
        eprintln!(
            "{}  {}/{} pages  {} iterations  {}ms  ({})",
            mark,
            bold(&s.completed_pages.to_string()),
            s.total_pages,
            s.total_iterations,
            s.duration_ms,
            label
        );
        for failure in doc.failures() {
            eprintln!("   {} {}", red("✗"), failure);
        }
        if let Some(ref path) = cli.output {
            eprintln!("   → {}", bold(&path.display().to_string()));
        }
    }

    Ok(match doc.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::from(2),
    })
}

/// Map CLI args to conversion options.
async fn build_options(
    cli: &Cli,
    signal: CancellationSignal,
    progress: Option<SharedProgressSink>,
) -> Result<ConvertOptions> {
    let system_prompt = match cli.system_prompt {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        ),
        None => None,
    };

    let mut source = PdfSourceConfig::builder()
        .dpi(cli.dpi)
        .pages(PageSelection::parse(&cli.pages)?)
        .download_timeout_secs(cli.download_timeout)
        .extract_images(!cli.no_image_tool);
    if let Some(ref pwd) = cli.password {
        source = source.password(pwd.clone());
    }

    let mut processing = ProcessingConfig::builder()
        .concurrency_limit(cli.concurrency)
        .max_iterations_per_page(cli.max_iterations)
        .failure_policy(if cli.continue_on_error {
            FailurePolicy::ContinueOnError
        } else {
            FailurePolicy::FailFast
        })
        .parallel_fail_fast(cli.fail_fast)
        .carry_previous_page(cli.carry_previous_page)
        .page_separator(parse_separator(&cli.separator))
        .include_toc(cli.toc);
    if let Some(secs) = cli.deadline {
        processing = processing.deadline(Duration::from_secs(secs));
    }
    if let Some(prompt) = system_prompt {
        processing = processing.system_prompt(prompt);
    }

    Ok(ConvertOptions {
        source: source.build().context("Invalid source configuration")?,
        processing: processing.build().context("Invalid configuration")?,
        mode: cli.mode.into(),
        signal: Some(signal),
        progress,
    })
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

// ── Progress bar ─────────────────────────────────────────────────────────

/// Render progress events until every sink clone is dropped.
///
/// The bar starts as a spinner while the PDF is loaded and switches to a
/// counter on the first event, which carries the page total.
async fn drive_progress_bar(mut rx: ProgressReceiver) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix("Preparing");
    bar.set_message("Loading PDF…");
    bar.enable_steady_tick(Duration::from_millis(80));

    let mut activated = false;
    while let Some(event) = rx.recv().await {
        if !activated {
            activate_bar(&bar, event.unit_total);
            activated = true;
        }
        on_event(&bar, &event);
    }
    bar.finish_and_clear();
}

fn activate_bar(bar: &ProgressBar, total: usize) {
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_length(total as u64);
    bar.set_prefix("Converting");
    bar.set_message("");
    bar.reset_eta();
}

fn on_event(bar: &ProgressBar, event: &ProgressEvent) {
    let page = event.unit_index + 1;
    let total = event.unit_total;
    match event.phase {
        TaskPhase::AwaitingAgent => bar.set_message(format!("page {page}: thinking")),
        TaskPhase::ToolExecuting => bar.set_message(format!("page {page}: using tools")),
        TaskPhase::Completed => {
            bar.println(format!("  {} Page {:>3}/{:<3}", green("✓"), page, total));
            bar.inc(1);
        }
        TaskPhase::Failed => {
            bar.println(format!("  {} Page {:>3}/{:<3}", red("✗"), page, total));
            bar.inc(1);
        }
        TaskPhase::Cancelled => bar.inc(1),
        TaskPhase::Queued | TaskPhase::Dispatched => {}
    }
}

async fn finish_bar(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        // A stuck receiver must not keep the process alive.
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
}
