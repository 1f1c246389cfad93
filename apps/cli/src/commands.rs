//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sheetloader_core::{ExtractionReport, Extractor, LocalFiles, ProgressReporter};
use sheetloader_parsers::ParserRegistry;
use sheetloader_remote::{HttpClient, JobApi, RetryPolicy};
use sheetloader_shared::{
    AppConfig, Destination, ExtractConfig, Job, JobId, JobStatus, init_config, load_config,
    load_config_from, validate_api_token,
};
use sheetloader_storage::LocalStore;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sheetloader: load spreadsheet-like files into a workbook store.
#[derive(Parser)]
#[command(
    name = "sheetloader",
    version,
    about = "Extract CSV, JSON and Markdown tables into workbook sheets, tracked as jobs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.sheetloader/sheetloader.toml).
    #[arg(long, global = true, env = "SHEETLOADER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract a file into a workbook.
    Extract(ExtractArgs),

    /// Inspect jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// List the registered file formats.
    Formats,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `extract`. Unset values fall back to the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct ExtractArgs {
    /// Remote file id, or a local path with --offline.
    pub file: String,

    /// Destination workbook id (a new workbook is created when omitted).
    #[arg(short, long)]
    pub workbook: Option<String>,

    /// Maximum records per write call.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Maximum concurrent write calls.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Wall-clock limit for the whole run, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Fail instead of creating sheets missing from the workbook.
    #[arg(long)]
    pub no_create_sheets: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Selects the remote API or the local store.
#[derive(Args, Debug, Default)]
pub(crate) struct StoreArgs {
    /// Use the local database instead of the remote API.
    #[arg(long)]
    pub offline: bool,

    /// Local database path (implies --offline).
    #[arg(long)]
    pub db: Option<PathBuf>,
}

impl StoreArgs {
    fn is_offline(&self) -> bool {
        self.offline || self.db.is_some()
    }
}

/// Job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Show a job's status.
    Status {
        id: String,

        /// Poll until the job is complete or failed.
        #[arg(long)]
        wait: bool,

        /// Maximum number of polls with --wait.
        #[arg(long, default_value = "60")]
        max_polls: u32,

        #[command(flatten)]
        store: StoreArgs,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sheetloader=info",
        1 => "sheetloader=debug",
        _ => "sheetloader=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let load = || match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };

    match &cli.command {
        Command::Extract(args) => cmd_extract(&load()?, args).await,
        Command::Job { action } => match action {
            JobAction::Status {
                id,
                wait,
                max_polls,
                store,
            } => cmd_job_status(&load()?, id, *wait, *max_polls, store).await,
        },
        Command::Formats => cmd_formats(),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&load()?),
        },
    }
}

/// Merge config-file defaults with command-line flags; flags win.
fn extract_config(config: &AppConfig, args: &ExtractArgs) -> ExtractConfig {
    let mut extract = ExtractConfig::from(config);
    if let Some(id) = &args.workbook {
        extract.destination = Destination::Workbook(id.clone());
    }
    if let Some(n) = args.chunk_size {
        extract.chunk_size = n;
    }
    if let Some(n) = args.concurrency {
        extract.concurrency = n;
    }
    if let Some(secs) = args.timeout {
        extract.timeout = Duration::from_secs(secs);
    }
    if args.no_create_sheets {
        extract.create_missing_sheets = false;
    }
    extract
}

fn http_client(config: &AppConfig) -> Result<HttpClient> {
    let token = validate_api_token(config)?;
    Ok(HttpClient::new(
        &config.remote,
        token,
        RetryPolicy::from(&config.retry),
    )?)
}

async fn local_store(config: &AppConfig, store: &StoreArgs) -> Result<LocalStore> {
    let path = match &store.db {
        Some(path) => path.clone(),
        None => config.offline.resolved_db_path()?,
    };
    info!(path = %path.display(), "using local store");
    Ok(LocalStore::open(&path).await?)
}

async fn cmd_extract(config: &AppConfig, args: &ExtractArgs) -> Result<()> {
    let extract = extract_config(config, args);
    let parsers = ParserRegistry::new();
    let reporter = CliProgress::new();

    info!(
        file = %args.file,
        offline = args.store.is_offline(),
        chunk_size = extract.chunk_size,
        concurrency = extract.concurrency,
        "extracting"
    );

    let report = if args.store.is_offline() {
        let store = local_store(config, &args.store).await?;
        Extractor::new(&LocalFiles, &store, &store, &parsers)
            .extract(&extract, &args.file, &reporter)
            .await?
    } else {
        let client = http_client(config)?;
        Extractor::new(&client, &client, &client, &parsers)
            .with_page_size(config.remote.page_size)
            .extract(&extract, &args.file, &reporter)
            .await?
    };

    print_report(&report);

    if report.succeeded() {
        Ok(())
    } else {
        Err(eyre!("job {} failed", report.job.id))
    }
}

fn print_report(report: &ExtractionReport) {
    println!();
    println!("  Job:      {}", report.job.id);
    println!("  Status:   {}", report.job.status);
    if let Some(outcome) = &report.job.outcome {
        println!("  Message:  {}", outcome.message);
    }
    println!("  Records:  {}", report.records_written);
    for sheet in &report.sheets {
        println!("    {:<24} {:>8}  ({})", sheet.name, sheet.records, sheet.sheet_id);
    }
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

async fn cmd_job_status(
    config: &AppConfig,
    id: &str,
    wait: bool,
    max_polls: u32,
    store: &StoreArgs,
) -> Result<()> {
    let job = if store.is_offline() {
        let local = local_store(config, store).await?;
        fetch_job(&local, id, wait, max_polls, config).await?
    } else {
        let client = http_client(config)?;
        fetch_job(&client, id, wait, max_polls, config).await?
    };

    print_job(&job);

    if wait && job.status == JobStatus::Failed {
        return Err(eyre!("job {} failed", job.id));
    }
    Ok(())
}

async fn fetch_job(
    api: &dyn JobApi,
    id: &str,
    wait: bool,
    max_polls: u32,
    config: &AppConfig,
) -> Result<Job> {
    let id = JobId::from(id);
    if !wait {
        return Ok(api.get_job(&id).await?);
    }

    let policy = RetryPolicy {
        max_attempts: max_polls.max(1),
        ..RetryPolicy::from(&config.retry)
    };
    let job = policy
        .poll_until(&JobStatus::TERMINAL, |job: &Job| job.status, || api.get_job(&id))
        .await?;
    Ok(job)
}

fn print_job(job: &Job) {
    println!("  Job:        {}", job.id);
    println!("  Type:       {} / {}", job.job_type, job.operation);
    println!("  Source:     {}", job.source);
    println!("  Status:     {}", job.status);
    println!("  Progress:   {}%", job.progress);
    if !job.info.is_empty() {
        println!("  Info:       {}", job.info);
    }
    if let Some(outcome) = &job.outcome {
        println!("  Outcome:    {}", outcome.message);
        if let Some(records) = outcome.records_written {
            println!("  Records:    {records}");
        }
    }
    if let Some(updated) = job.updated_at {
        println!("  Updated:    {}", updated.to_rfc3339());
    }
}

fn cmd_formats() -> Result<()> {
    let registry = ParserRegistry::new();
    println!("  {:<24} FORMAT", "EXTENSION");
    for (matcher, format) in registry.describe() {
        println!("  {matcher:<24} {format}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

// Pre-job errors return through `?` without reaching `done`; stop the
// steady tick before color-eyre prints the report.
impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn tick(&self, progress: u8, info: &str) {
        self.spinner.set_message(format!("[{progress:>3}%] {info}"));
    }

    fn chunk_written(&self, sheet: &str, chunk: usize, chunks: usize, records: usize) {
        self.spinner
            .set_message(format!("[ 70%] writing {sheet}: chunk {chunk}/{chunks} ({records} records)"));
    }

    fn done(&self, _report: &ExtractionReport) {
        self.spinner.finish_and_clear();
    }
}
