//! CLI binary for pdf2records.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one job stage (or all of them) and streams the
//! session's progress log to the terminal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2records::pipeline::render::{RenderError, RenderOptions};
use pdf2records::vision::{OpenAiVisionClient, ProviderSelection, ProviderVisionClient};
use pdf2records::{
    Document, ExtractionJob, ExtractionReport, ExtractionType, JsonlSink, PdfiumBackend,
    PipelineConfig, PromptSpec, RenderBackend, SessionLog, VisionClient, VisionError,
    VisionRequest,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

const SESSION: &str = "cli";

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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full per-page pipeline: upload, rasterise, extract, save
  pdf2records run report.pdf

  # Stage by stage against the same work directory
  pdf2records rasterize report.pdf            # prints the document id
  pdf2records extract --doc <ID> --prompts prompts.json
  pdf2records extract-simple --doc <ID>
  pdf2records save --doc <ID> --name report.pdf

  # Print the effective configuration
  pdf2records --dpi 200 --concurrency 4 config

PROMPTS FILE:
  [{"detail": "Explain every diagram.", "extractionTypes": ["semantic", "qa"], "includeImage": true}]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  OPENAI_BASE_URL         Endpoint for --client openai (default https://api.openai.com)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Rasterise PDFs and extract per-page Markdown records with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2records",
    version,
    about = "Rasterise PDFs and extract per-page Markdown records with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Work directory holding uploads, page images and artifacts.
    #[arg(long, global = true, env = "PDF2RECORDS_WORK_DIR", default_value = "pdf2records-work")]
    work_dir: PathBuf,

    /// Directory of the JSON-lines record store.
    #[arg(long, global = true, env = "PDF2RECORDS_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Rendering DPI (72–600).
    #[arg(long, global = true, env = "PDF2RECORDS_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, global = true, env = "PDF2RECORDS_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// Rasterisation worker-pool size.
    #[arg(long, global = true, env = "PDF2RECORDS_RENDER_WORKERS", default_value_t = 20)]
    render_workers: usize,

    /// Maximum upload size in MB.
    #[arg(long, global = true, env = "PDF2RECORDS_MAX_UPLOAD_MB", default_value_t = 200)]
    max_upload_mb: u64,

    /// Pages per extraction window.
    #[arg(long, global = true, env = "PDF2RECORDS_WINDOW_SIZE", default_value_t = 2)]
    window_size: usize,

    /// Pages between window starts.
    #[arg(long, global = true, env = "PDF2RECORDS_STEP_SIZE", default_value_t = 2)]
    step_size: usize,

    /// Enabled extraction types, comma-separated.
    #[arg(long, global = true, env = "PDF2RECORDS_TYPES", value_delimiter = ',',
          default_value = "raw,semantic,qa,keywords")]
    types: Vec<String>,

    /// Concurrent per-page extraction calls.
    #[arg(short, long, global = true, env = "PDF2RECORDS_CONCURRENCY", default_value_t = 6)]
    concurrency: usize,

    /// Retries per page after a rate-limit rejection.
    #[arg(long, global = true, env = "PDF2RECORDS_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Linear backoff base in milliseconds.
    #[arg(long, global = true, env = "PDF2RECORDS_RETRY_DELAY_MS", default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Interval of the "pages finished" progress line in milliseconds.
    #[arg(long, global = true, env = "PDF2RECORDS_PROGRESS_INTERVAL_MS", default_value_t = 700)]
    progress_interval_ms: u64,

    /// How long a resized pool may keep draining, in milliseconds.
    #[arg(long, global = true, env = "PDF2RECORDS_POOL_GRACE_MS", default_value_t = 5000)]
    pool_grace_ms: u64,

    /// Store collection for persisted records.
    #[arg(long, global = true, env = "PDF2RECORDS_COLLECTION", default_value = "extracted_documents")]
    collection: String,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "PDF2RECORDS_PASSWORD")]
    password: Option<String>,

    /// Vision client: `provider` (edgequake-llm) or `openai` (raw HTTP).
    #[arg(long, global = true, env = "PDF2RECORDS_CLIENT", value_enum, default_value = "provider")]
    client: ClientArg,

    /// LLM provider: openai, anthropic, gemini, ollama.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Disable the progress display.
    #[arg(long, global = true, env = "PDF2RECORDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2RECORDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2RECORDS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ClientArg {
    Provider,
    Openai,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload, rasterise, extract every page and save the records.
    Run {
        pdf: PathBuf,
        /// Also run these prompts (whole-document / windowed / keywords).
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
    /// Upload and rasterise only.
    Rasterize { pdf: PathBuf },
    /// Run prompts over a rasterised document.
    Extract {
        #[arg(long)]
        doc: String,
        /// JSON prompt list; defaults to one raw "Extract all paragraphs." prompt.
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
    /// Extract every page of a rasterised document independently.
    ExtractSimple {
        #[arg(long)]
        doc: String,
    },
    /// Aggregate per-page artifacts into the record store.
    Save {
        #[arg(long)]
        doc: String,
        /// Original file name stamped on each record.
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the effective configuration as JSON.
    Config,
}

impl Command {
    fn needs_renderer(&self) -> bool {
        matches!(self, Command::Run { .. } | Command::Rasterize { .. })
    }

    fn needs_vision(&self) -> bool {
        matches!(
            self,
            Command::Run { .. } | Command::Extract { .. } | Command::ExtractSimple { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress display replaces INFO-level library logs.
    let show_progress = !g.quiet && !g.no_progress;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    let config = build_config(g)?;
    if let Command::Config = cli.command {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).context("Failed to serialise config")?
        );
        return Ok(());
    }

    let backend: Arc<dyn RenderBackend> = if cli.command.needs_renderer() {
        Arc::new(PdfiumBackend::bind().context("Failed to bind pdfium")?)
    } else {
        Arc::new(NoRenderer)
    };
    let client: Arc<dyn VisionClient> = if cli.command.needs_vision() {
        build_client(g)?
    } else {
        Arc::new(NoVision)
    };
    let store_dir = g
        .store_dir
        .clone()
        .unwrap_or_else(|| g.work_dir.join("store"));
    let sink = Arc::new(JsonlSink::new(&store_dir));
    let job = ExtractionJob::new(&g.work_dir, config, backend, client, sink)
        .context("Invalid configuration")?;

    let log = job.session(SESSION);
    let display = show_progress.then(|| Display::start(log.clone()));
    let outcome = run_command(&job, &cli.command).await;
    if let Some(display) = display {
        display.finish().await;
    } else if !g.quiet {
        for event in log.snapshot() {
            eprintln!("{}", event.message);
        }
    }

    let summary = outcome?;
    if !g.quiet {
        eprintln!("{summary}");
    }
    if let Command::Rasterize { .. } = cli.command {
        // Document id on stdout for scripting.
        if let Some(id) = summary.document_id {
            println!("{id}");
        }
    }
    if let Command::Save { .. } | Command::Run { .. } = cli.command {
        eprintln!(
            "   records → {}",
            dim(&store_dir.join(format!("{}.jsonl", job.config().collection)).display().to_string())
        );
    }
    Ok(())
}

/// What a subcommand reports back.
struct Summary {
    document_id: Option<String>,
    lines: Vec<String>,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

async fn run_command(job: &ExtractionJob, command: &Command) -> Result<Summary> {
    match command {
        Command::Run { pdf, prompts } => {
            let summary = job
                .run_per_page(pdf, SESSION)
                .await
                .context("Pipeline failed")?;
            let mut lines = vec![
                raster_line(summary.raster.succeeded(), summary.raster.total),
                extraction_line("Per-page", &summary.extraction),
                save_line(summary.saved.saved.len(), summary.saved.failed.len()),
            ];
            if let Some(path) = prompts {
                let prompts = load_prompts(Some(path)).await?;
                let report = job
                    .extract(&summary.document, &prompts, SESSION)
                    .await
                    .context("Prompt extraction failed")?;
                lines.push(extraction_line("Prompted", &report));
            }
            lines.push(format!("   document {}", bold(&summary.document.id)));
            Ok(Summary {
                document_id: Some(summary.document.id),
                lines,
            })
        }
        Command::Rasterize { pdf } => {
            let mut document = job.ingest_file(pdf).await.context("Upload rejected")?;
            let report = job
                .rasterize(&mut document, SESSION)
                .await
                .context("Rasterisation failed")?;
            Ok(Summary {
                lines: vec![raster_line(report.succeeded(), report.total)],
                document_id: Some(document.id),
            })
        }
        Command::Extract { doc, prompts } => {
            let document = resume(job, doc)?;
            let prompts = load_prompts(prompts.as_deref()).await?;
            let report = job
                .extract(&document, &prompts, SESSION)
                .await
                .context("Extraction failed")?;
            Ok(Summary {
                document_id: Some(document.id),
                lines: vec![extraction_line("Prompted", &report)],
            })
        }
        Command::ExtractSimple { doc } => {
            let mut document = resume(job, doc)?;
            let report = job
                .extract_per_page(&mut document, SESSION)
                .await
                .context("Extraction failed")?;
            Ok(Summary {
                document_id: Some(document.id),
                lines: vec![extraction_line("Per-page", &report)],
            })
        }
        Command::Save { doc, name } => {
            let document = Document {
                id: doc.clone(),
                original_filename: name.clone().unwrap_or_else(|| format!("{doc}.pdf")),
                stored_path: PathBuf::new(),
                pages: Vec::new(),
            };
            let report = job
                .persist(&document, SESSION)
                .await
                .context("Saving records failed")?;
            Ok(Summary {
                document_id: Some(document.id),
                lines: vec![save_line(report.saved.len(), report.failed.len())],
            })
        }
        Command::Config => Ok(Summary {
            document_id: None,
            lines: Vec::new(),
        }),
    }
}

fn resume(job: &ExtractionJob, doc: &str) -> Result<Document> {
    job.resume(doc, doc)
        .with_context(|| format!("No rasterised pages for document {doc}"))
}

fn raster_line(ok: usize, total: usize) -> String {
    let mark = if ok == total { green("✔") } else { red("✘") };
    format!("{mark} {}/{total} pages rasterised", bold(&ok.to_string()))
}

fn extraction_line(label: &str, report: &ExtractionReport) -> String {
    let mark = if report.failed() == 0 {
        green("✔")
    } else {
        red("✘")
    };
    format!(
        "{mark} {label} extraction: {} ok, {} failed  {}",
        bold(&report.succeeded().to_string()),
        report.failed(),
        dim(&format!("{} tokens", report.total_tokens())),
    )
}

fn save_line(saved: usize, failed: usize) -> String {
    let mark = if failed == 0 { green("✔") } else { red("✘") };
    format!("{mark} {} records saved, {failed} failed", bold(&saved.to_string()))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs) -> Result<PipelineConfig> {
    let types = g
        .types
        .iter()
        .map(|t| t.parse::<ExtractionType>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --types")?;
    let mut builder = PipelineConfig::builder()
        .dpi(g.dpi)
        .max_rendered_pixels(g.max_pixels)
        .render_workers(g.render_workers)
        .max_upload_mb(g.max_upload_mb)
        .window_size(g.window_size)
        .step_size(g.step_size)
        .enabled_types(types)
        .page_concurrency(g.concurrency)
        .max_retries(g.max_retries)
        .retry_base_delay_ms(g.retry_delay_ms)
        .progress_interval_ms(g.progress_interval_ms)
        .pool_grace_ms(g.pool_grace_ms)
        .collection(g.collection.clone());
    if let Some(ref pwd) = g.password {
        builder = builder.password(pwd.clone());
    }
    builder.build().context("Invalid configuration")
}

fn build_client(g: &GlobalArgs) -> Result<Arc<dyn VisionClient>> {
    Ok(match g.client {
        ClientArg::Provider => {
            let selection = ProviderSelection {
                provider: g.provider.clone(),
                model: g.model.clone(),
            };
            Arc::new(ProviderVisionClient::resolve(&selection)?)
        }
        ClientArg::Openai => {
            let mut client = OpenAiVisionClient::from_env()?;
            if let Some(ref model) = g.model {
                client = client.with_model(model.clone());
            }
            Arc::new(client)
        }
    })
}

async fn load_prompts(path: Option<&Path>) -> Result<Vec<PromptSpec>> {
    let Some(path) = path else {
        return Ok(PromptSpec::default_list());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompts from {}", path.display()))?;
    let prompts: Vec<PromptSpec> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid prompts file {}", path.display()))?;
    if prompts.is_empty() {
        return Ok(PromptSpec::default_list());
    }
    Ok(prompts)
}

// ── Progress display ─────────────────────────────────────────────────────────

/// Spinner that echoes new session-log lines above itself.
struct Display {
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Display {
    fn start(log: SessionLog) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Working");
        bar.enable_steady_tick(Duration::from_millis(80));

        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut seen = 0;
            loop {
                let stopping = tokio::select! {
                    _ = &mut stopped => true,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => false,
                };
                for event in log.since(seen) {
                    seen += 1;
                    let line = if event.message.contains("Error") || event.message.contains("failed") {
                        red(&event.message)
                    } else {
                        dim(&event.message)
                    };
                    bar.println(format!("  {line}"));
                    bar.set_message(event.message);
                }
                if stopping {
                    break;
                }
            }
            bar.finish_and_clear();
        });
        Self { stop, task }
    }

    async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

// ── Stand-ins for stages a subcommand does not use ───────────────────────────

struct NoRenderer;

impl RenderBackend for NoRenderer {
    fn page_count(&self, _pdf: &[u8], _password: Option<&str>) -> Result<usize, RenderError> {
        Err(RenderError::Load("rendering is not available for this command".into()))
    }

    fn render_page(
        &self,
        _pdf: &[u8],
        _index: usize,
        _opts: &RenderOptions,
    ) -> Result<DynamicImage, RenderError> {
        Err(RenderError::Page("rendering is not available for this command".into()))
    }
}

struct NoVision;

#[async_trait]
impl VisionClient for NoVision {
    async fn extract(&self, _request: &VisionRequest) -> Result<String, VisionError> {
        Err(VisionError::Failed {
            message: "no vision client configured for this command".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_config_field_has_a_flag() {
        let cli = Cli::try_parse_from([
            "pdf2records",
            "--max-pixels",
            "2048",
            "--progress-interval-ms",
            "250",
            "--pool-grace-ms",
            "900",
            "config",
        ])
        .unwrap();
        let config = build_config(&cli.global).unwrap();
        assert_eq!(config.max_rendered_pixels, 2048);
        assert_eq!(config.progress_interval_ms, 250);
        assert_eq!(config.pool_grace_ms, 900);
    }

    #[test]
    fn tiny_pixel_cap_is_rejected() {
        let cli = Cli::try_parse_from(["pdf2records", "--max-pixels", "10", "config"]).unwrap();
        assert!(build_config(&cli.global).is_err());
    }
}
