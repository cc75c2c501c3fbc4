//! CLI binary for edgequake-storybook.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `StoryConfig` and prints the finished story.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_storybook::{
    generate_story, generate_to_file, ArtStyle, ImageSchedule, JsonFileStore, ProgressCallback,
    Stage, StoryConfig, StoryContextInput, StoryGenerationRequest, StoryOutput,
    StoryProgressCallback, StoryStore, StoryType,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

/// Spinner through the text stages, then a page bar while images are drawn.
/// Pages complete out of order under the worker pool.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Story");
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl StoryProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_illustration_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Illustrating");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Illustrating {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, reason: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  attempt {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            dim(reason),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, placeholder: bool) {
        let secs = self.elapsed_secs(page_num);
        let mark = if placeholder {
            yellow("▢ placeholder")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            mark,
            page_num,
            total,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_story_complete(&self, total_pages: usize, generated: usize) {
        self.bar.finish_and_clear();
        let missing = total_pages.saturating_sub(generated);
        if missing == 0 {
            eprintln!("{} {} pages illustrated", green("✔"), bold(&generated.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages illustrated  ({} placeholder)",
                yellow("⚠"),
                bold(&generated.to_string()),
                total_pages,
                missing,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Eight-page watercolor fantasy, printed to stdout
  storybook "a shy hedgehog who wants to see the sea"

  # Twelve pages, comic style, written to a file
  storybook "two sisters build a treehouse" --pages 12 --style comic --type realistic -o story.json

  # Keep a copy of every story in a directory
  storybook "a robot learns to paint" --store-dir ./stories

  # Use a specific text model
  storybook --provider openai --model gpt-4.1-mini "a penguin in the desert"

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY      OpenRouter key (default text provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openrouter, openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  FAL_KEY                 fal.ai key for image generation
  FAL_IMAGE_MODEL         fal.ai model path (default fal-ai/flux/schnell)
"#;

/// Generate an illustrated children's story from a short prompt.
#[derive(Parser, Debug)]
#[command(
    name = "storybook",
    version,
    about = "Generate an illustrated children's story from a short prompt",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// What the story should be about.
    prompt: String,

    /// Number of pages: 8, 12 or 16.
    #[arg(long, env = "STORYBOOK_PAGES", default_value_t = 8)]
    pages: usize,

    /// Illustration style.
    #[arg(long, env = "STORYBOOK_STYLE", value_enum, default_value = "pixi-book")]
    style: StyleArg,

    /// Story tone.
    #[arg(long = "type", env = "STORYBOOK_TYPE", value_enum, default_value = "fantasy")]
    story_type: TypeArg,

    /// Write the story JSON to this file instead of stdout.
    #[arg(short, long, env = "STORYBOOK_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the full JSON output to stdout instead of a readable listing.
    #[arg(long, env = "STORYBOOK_JSON")]
    json: bool,

    /// Also persist a record of the story into this directory.
    #[arg(long, env = "STORYBOOK_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// LLM model ID for the text stages.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openrouter, openai, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum concurrent image requests.
    #[arg(short, long, env = "STORYBOOK_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Start image requests in fixed groups instead of a rolling pool.
    #[arg(long, env = "STORYBOOK_BATCHED")]
    batched: bool,

    /// Image retries per page after the first attempt.
    #[arg(long, env = "STORYBOOK_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Per-call timeout for text and image requests, in seconds.
    #[arg(long, env = "STORYBOOK_API_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Overall deadline for the whole story, in seconds.
    #[arg(long, env = "STORYBOOK_DEADLINE")]
    deadline: Option<u64>,

    /// Disable progress bar.
    #[arg(long, env = "STORYBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STORYBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STORYBOOK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum StyleArg {
    PeppaPig,
    PixiBook,
    Watercolor,
    Comic,
}

impl From<StyleArg> for ArtStyle {
    fn from(v: StyleArg) -> Self {
        match v {
            StyleArg::PeppaPig => ArtStyle::PeppaPig,
            StyleArg::PixiBook => ArtStyle::PixiBook,
            StyleArg::Watercolor => ArtStyle::Watercolor,
            StyleArg::Comic => ArtStyle::Comic,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum TypeArg {
    Fantasy,
    Realistic,
}

impl From<TypeArg> for StoryType {
    fn from(v: TypeArg) -> Self {
        match v {
            TypeArg::Fantasy => StoryType::Fantasy,
            TypeArg::Realistic => StoryType::Realistic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
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

    // ── Validate request ─────────────────────────────────────────────────
    let request = StoryGenerationRequest::new(
        cli.prompt.clone(),
        StoryContextInput {
            story_type: cli.story_type.clone().into(),
            art_style: cli.style.clone().into(),
            page_count: cli.pages,
        },
    )
    .validate()
    .context("Invalid story request")?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn StoryProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Generate ─────────────────────────────────────────────────────────
    let output = match cli.output {
        Some(ref path) => generate_to_file(&request, path, &config)
            .await
            .context("Story generation failed")?,
        None => generate_story(&request, &config)
            .await
            .context("Story generation failed")?,
    };

    // ── Persist (best-effort) ────────────────────────────────────────────
    if let Some(ref dir) = cli.store_dir {
        let store = JsonFileStore::new(dir);
        let record = output.to_record(&request);
        match store.insert(&record).await {
            Ok(()) if !cli.quiet => eprintln!(
                "{} stored as {}",
                dim("record"),
                store.path_for(record.id).display()
            ),
            Ok(()) => {}
            Err(e) => eprintln!("{} {}", yellow("⚠"), e),
        }
    }

    // ── Print ────────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if let Some(ref path) = cli.output {
        if !cli.quiet {
            eprintln!(
                "{}  {}  {} pages  {}ms  →  {}",
                green("✔"),
                bold(&output.title),
                output.stats.page_count,
                output.stats.total_duration_ms,
                bold(&path.display().to_string()),
            );
        }
    } else {
        print_story(&output);
    }

    if !cli.quiet && !show_progress && output.stats.placeholder_pages > 0 {
        eprintln!(
            "  {} of {} pages use the placeholder image",
            output.stats.placeholder_pages, output.stats.page_count
        );
    }

    Ok(())
}

/// Map CLI args to `StoryConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<StoryConfig> {
    let schedule = if cli.batched {
        ImageSchedule::Batched
    } else {
        ImageSchedule::Pool
    };

    let mut builder = StoryConfig::builder()
        .image_concurrency(cli.concurrency)
        .image_schedule(schedule)
        .image_max_retries(cli.retries)
        .api_timeout_secs(cli.timeout);

    if let Some(secs) = cli.deadline {
        builder = builder.pipeline_timeout_secs(secs);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_story(output: &StoryOutput) {
    println!("{}\n", bold(&output.title));
    for (i, (text, url)) in output
        .text_content
        .iter()
        .zip(&output.image_urls)
        .enumerate()
    {
        println!("{} {}", cyan(&format!("[{}]", i + 1)), text);
        println!("    {}\n", dim(url));
    }
}
