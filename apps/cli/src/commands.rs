//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agentsync_core::{ProgressReporter, RunReport, SyncPipeline};
use agentsync_shared::{
    AppConfig, PipelineConfig, PipelineStage, config_file_path, init_config_at, load_config,
    load_config_from,
};
use agentsync_store::{DocumentStore, OpenSearchClient};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// AgentSync: detect agencies among listing owners and sync the agency flag.
#[derive(Parser)]
#[command(
    name = "agentsync",
    version,
    about = "Detect repeat listing owners, maintain the agent registry, and flag their listings.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.agentsync/agentsync.toml).
    #[arg(long, env = "AGENTSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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
    /// Run detection, registry reconciliation and flag propagation once.
    Run {
        /// Print the run report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Show the status of a submitted flag update.
    Task {
        /// Task id printed by `agentsync run`.
        task_id: String,

        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
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
    /// Initialize config file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
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
        0 => "agentsync=info",
        1 => "agentsync=debug",
        _ => "agentsync=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
        Command::Run { json } => cmd_run(config_path, json).await,
        Command::Task { task_id, json } => cmd_task(config_path, &task_id, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(config_path, force),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config from `--config` if given, else the default location.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn connect(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    let client = OpenSearchClient::new(&config.store).wrap_err("cannot set up store client")?;
    info!(url = %client.base_url(), "using document store");
    Ok(Arc::new(client))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let store = connect(&config)?;
    let pipeline = SyncPipeline::new(store, PipelineConfig::from(&config));

    let reporter = CliProgress::new();
    let report = pipeline.run(&reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let r = &report.reconcile;
    println!();
    println!("  Sync run complete.");
    println!("  Run:        {}", report.run_id);
    println!("  Registry:   {} ({:?})", report.registry_index, report.registry_status);
    println!("  Agencies:   {}", report.candidates);
    println!(
        "  Written:    {} ({} new, {} manual kept)",
        r.upserted, r.created, r.preserved_manual
    );
    if r.skipped > 0 || r.failed > 0 {
        println!("  Skipped:    {}", r.skipped);
        println!("  Failed:     {}", r.failed);
    }
    match &report.task {
        Some(task) => {
            println!(
                "  Flag task:  {} ({} contacts on '{}')",
                task.task_id, task.contact_count, task.index
            );
            println!("              check with: agentsync task {}", task.task_id);
        }
        None => println!("  Flag task:  none (no agencies detected)"),
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_task(config_path: Option<&Path>, task_id: &str, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let store = connect(&config)?;

    let status = store
        .task_status(task_id)
        .await
        .wrap_err_with(|| format!("cannot read task {task_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let state = if status.completed { "completed" } else { "running" };
    println!();
    println!("  Task:       {} ({state})", status.task_id);
    println!("  Matched:    {}", status.total);
    println!("  Updated:    {}", status.updated);
    println!("  Conflicts:  {}", status.version_conflicts);
    println!("  Failures:   {}", status.failures);
    println!();

    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if path.exists() && !force {
        return Err(eyre!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        ));
    }
    init_config_at(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: PipelineStage) {
        match stage {
            PipelineStage::Init => self.spinner.set_message("Checking agent registry"),
            PipelineStage::Detecting => self.spinner.set_message("Detecting agencies"),
            PipelineStage::Reconciling => self.spinner.set_message("Writing agent records"),
            PipelineStage::Propagating => self.spinner.set_message("Submitting flag update"),
            PipelineStage::Done | PipelineStage::Failed => self.spinner.finish_and_clear(),
        }
    }

    fn candidates_found(&self, count: usize) {
        self.spinner
            .set_message(format!("Detected {count} agencies"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
