//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use subharvest_core::{ProgressReporter, RunConfig};
use subharvest_shared::{
    ArtifactStatus, CONFIG_FILE_NAME, EmptyBucketPolicy, HarvestError, LoadedConfig, Protocol, RunResult,
    SourceStatus, init_config, load_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// subharvest: harvest proxy subscription entries into per-protocol files.
#[derive(Parser)]
#[command(
    name = "subharvest",
    version,
    about = "Fetch, validate, deduplicate and classify proxy subscription entries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./subharvest.toml, then ~/.subharvest/subharvest.toml).
    #[arg(long, global = true, env = "SUBHARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Run one harvest pass and write artifacts plus the summary.
    Run {
        /// Override the output directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// What to do with a protocol file whose bucket is empty: preserve or truncate.
        #[arg(long, value_parser = parse_empty_bucket)]
        empty_bucket: Option<EmptyBucketPolicy>,

        /// Override the number of concurrent fetches.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        concurrency: Option<u32>,

        /// Cancel the run if it has not finished after this many seconds.
        #[arg(long)]
        run_timeout_secs: Option<u64>,
    },

    /// List the configured sources.
    Sources,

    /// Validate entries and print their protocol and canonical form.
    Check {
        /// Entries to check, e.g. `trojan://pass@host:443`.
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a starter config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show the resolved configuration.
    Show,
}

fn parse_empty_bucket(value: &str) -> std::result::Result<EmptyBucketPolicy, String> {
    match value.to_ascii_lowercase().as_str() {
        "preserve" => Ok(EmptyBucketPolicy::Preserve),
        "truncate" => Ok(EmptyBucketPolicy::Truncate),
        other => Err(format!("expected 'preserve' or 'truncate', got '{other}'")),
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "subharvest=info",
        1 => "subharvest=debug",
        _ => "subharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            output_dir,
            empty_bucket,
            concurrency,
            run_timeout_secs,
        } => {
            let overrides = RunOverrides {
                output_dir,
                empty_bucket,
                concurrency,
                run_timeout: run_timeout_secs.map(Duration::from_secs),
            };
            cmd_run(config_path, overrides).await
        }
        Command::Sources => cmd_sources(config_path),
        Command::Check { entries } => cmd_check(&entries),
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(config_path, force),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
struct RunOverrides {
    output_dir: Option<PathBuf>,
    empty_bucket: Option<EmptyBucketPolicy>,
    concurrency: Option<u32>,
    run_timeout: Option<Duration>,
}

impl RunOverrides {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(policy) = self.empty_bucket {
            config.empty_bucket = policy;
        }
        if let Some(n) = self.concurrency {
            config.fetch.concurrency = n as usize;
        }
    }
}

async fn cmd_run(config_path: Option<&Path>, overrides: RunOverrides) -> Result<()> {
    let loaded = load_config(config_path)?;
    let sources = loaded.sources()?;
    let mut run_config = RunConfig::from_loaded(&loaded)?;
    overrides.apply(&mut run_config);

    info!(
        config = %loaded.path.display(),
        sources = sources.len(),
        output = %run_config.output_dir.display(),
        "starting harvest"
    );

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone(), overrides.run_timeout));

    let reporter = CliProgress::new();
    let outcome = subharvest_core::run(&run_config, &sources, &reporter, &cancel).await;
    watcher.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    print_result(&result, &run_config);
    Ok(())
}

/// Cancel the run on Ctrl-C or when the optional deadline passes.
async fn cancel_on_signal(cancel: CancellationToken, timeout: Option<Duration>) {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "could not listen for Ctrl-C");
                return;
            }
            warn!("interrupt received, cancelling run");
        }
        _ = deadline => {
            warn!(timeout_secs = timeout.map_or(0, |t| t.as_secs()), "run timeout reached, cancelling run");
        }
    }
    cancel.cancel();
}

fn print_result(result: &RunResult, config: &RunConfig) {
    let stats = &result.stats;
    let elapsed = (result.finished_at - result.started_at)
        .to_std()
        .unwrap_or_default();

    println!();
    println!("  Harvest complete");
    println!("  Run:        {}", result.run_id);
    println!("  Unique:     {}", stats.total_unique);
    println!(
        "  Sources:    {} ok, {} failed (of {})",
        stats.sources_succeeded, stats.sources_failed, stats.sources_total
    );
    println!(
        "  Rejected:   {} (unknown prefix {}, malformed {}, truncated {})",
        stats.rejected(),
        stats.rejected_unknown_prefix,
        stats.rejected_malformed,
        stats.rejected_truncated
    );
    println!("  Duplicates: {}", stats.duplicates);
    println!();

    for protocol in Protocol::ALL {
        println!("  {:<14} {:>6}", protocol.tag(), result.count(protocol));
    }
    println!();

    for report in result.failed_sources() {
        let reason = match &report.status {
            SourceStatus::FetchFailed { reason } => format!("fetch: {reason}"),
            SourceStatus::ParseFailed { reason } => format!("parse: {reason}"),
            SourceStatus::Ok => continue,
        };
        println!("  ! source {}: {reason}", report.source_id);
    }
    for artifact in result.failed_artifacts() {
        if let ArtifactStatus::Failed { cause } = &artifact.status {
            println!("  ! write {}: {cause}", artifact.file);
        }
    }

    println!("  Output:     {}", config.output_dir.display());
    println!("  Summary:    {}", config.summary_path.display());
    println!("  Time:       {:.1}s", elapsed.as_secs_f64());
    println!();
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_fetched(&self, source_id: &str, ok: bool, current: usize, total: usize) {
        let mark = if ok { "ok" } else { "failed" };
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {source_id} ({mark})"));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// sources / check
// ---------------------------------------------------------------------------

fn cmd_sources(config_path: Option<&Path>) -> Result<()> {
    let loaded = load_config(config_path)?;
    let sources = loaded.sources()?;

    println!("  {} sources from {}", sources.len(), loaded.path.display());
    println!();
    let width = sources.iter().map(|s| s.id.len()).max().unwrap_or(0);
    for source in &sources {
        println!(
            "  {:<width$}  {:<6}  {}",
            source.id,
            source.format.to_string(),
            source.location
        );
    }
    Ok(())
}

fn cmd_check(entries: &[String]) -> Result<()> {
    let mut rejected = 0;
    for candidate in entries {
        match subharvest_validator::validate(candidate.trim()) {
            Ok(valid) => println!("ok        {:<12} {}", valid.protocol.tag(), valid.canonical),
            Err(rejection) => {
                rejected += 1;
                println!("rejected  {rejection}: {candidate}");
            }
        }
    }

    if rejected > 0 {
        let err = HarvestError::validation(format!("{rejected} of {} entries rejected", entries.len()));
        return Err(err.into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let target = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let path = init_config(&target, force)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let loaded: LoadedConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&loaded.config)?;
    println!("# {}", loaded.path.display());
    println!("{toml_str}");
    Ok(())
}
