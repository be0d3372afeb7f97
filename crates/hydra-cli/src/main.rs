//! Hydra - automated security-audit pipeline CLI
//!
//! ## Commands
//!
//! - `scan`: run the full pipeline against a repository
//! - `diff`: scan only the changed-file set between two refs
//! - `report`: convert a stored JSON report to markdown or SARIF
//! - `config`: inspect or edit `.hydra/config.toml`
//! - `daemon`: serve the HTTP trigger surface

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use hydra_core::cache::ScanCache;
use hydra_core::config::HydraConfig;
use hydra_core::domain::report::ScanReport;
use hydra_core::orchestrator::{DiffOptions, HydraOrchestrator, ScanOptions};
use hydra_core::reasoner::{HttpReasoner, Reasoner};
use hydra_core::{reporting, ScanMode};
use hydra_scanners::build_task_set;
use hydrad::{DaemonConfig, DaemonState};

#[derive(Parser)]
#[command(name = "hydra")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated security-audit pipeline for code repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Repository root to scan
    path: PathBuf,

    /// Base ref for diff scope
    #[arg(long)]
    base_ref: Option<String>,

    /// Head ref for diff scope (defaults to HEAD)
    #[arg(long)]
    head_ref: Option<String>,

    /// Print the full report as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Also write a SARIF document to this path
    #[arg(long, value_name = "PATH")]
    sarif: Option<PathBuf>,

    /// Run the adversarial validation pass
    #[arg(long)]
    adversarial: bool,

    /// Run the patch pipeline (implies adversarial validation)
    #[arg(long)]
    patch: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository
    Scan {
        #[command(flatten)]
        args: ScanArgs,

        /// Scan mode
        #[arg(long, default_value = "full")]
        mode: CliMode,
    },

    /// Scan only the changed files between two refs
    Diff {
        #[command(flatten)]
        args: ScanArgs,
    },

    /// Convert a stored JSON report
    Report {
        /// Path to a report JSON file
        file: PathBuf,

        /// Output format
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or edit configuration
    Config {
        /// Write commented defaults to .hydra/config.toml
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Set one key, as KEY=VAL
        #[arg(long, value_name = "KEY=VAL")]
        set: Option<String>,
    },

    /// Serve the HTTP trigger daemon
    Daemon {
        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(long, default_value = "8787")]
        port: u16,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
    Sarif,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Full,
    Diff,
}

impl From<CliMode> for ScanMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Full => ScanMode::Full,
            CliMode::Diff => ScanMode::Diff,
        }
    }
}

#[tokio::main]
async fn main() {
    // Exit 1 on invalid arguments, per the CLI contract; help and version
    // output still exit 0.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(if e.use_stderr() { 1 } else { 0 });
    });

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    hydra_core::init_tracing(cli.json_logs, level);

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Scan { args, mode } => run_scan(args, mode.into()).await,
        Commands::Diff { args } => run_scan(args, ScanMode::Diff).await,
        Commands::Report {
            file,
            format,
            output,
        } => run_report(file, format, output),
        Commands::Config { init, show, set } => run_config(init, show, set),
        Commands::Daemon { host, port } => {
            let config = DaemonConfig::from_env()?;
            let state = DaemonState::new(config);
            hydrad::serve(state, &host, port).await
        }
    }
}

async fn run_scan(args: ScanArgs, mode: ScanMode) -> Result<()> {
    let config = HydraConfig::load(&args.path)?;
    let cache = Arc::new(
        ScanCache::with_capacity(&args.path, config.cache_max_entries)
            .with_default_ttl(config.cache_ttl_ms),
    );
    let reasoner: Option<Arc<dyn Reasoner>> =
        HttpReasoner::from_env().map(|r| Arc::new(r) as Arc<dyn Reasoner>);

    let tasks = build_task_set(&config, reasoner.clone(), Some(Arc::clone(&cache)));
    let orchestrator = HydraOrchestrator::new(config, tasks)
        .with_reasoner(reasoner)
        .with_cache(cache);

    let options = ScanOptions {
        adversarial: args.adversarial,
        patch: args.patch,
        skip_review: false,
    };

    let report = match mode {
        ScanMode::Full => orchestrator.run_full_scan(&args.path, options).await?,
        ScanMode::Diff => {
            orchestrator
                .run_diff_scan(
                    &args.path,
                    DiffOptions {
                        base_ref: args.base_ref,
                        head_ref: args.head_ref,
                        changed_files: vec![],
                    },
                    options,
                )
                .await?
        }
    };

    if let Some(sarif_path) = &args.sarif {
        reporting::write_report_sarif(sarif_path, &report)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", reporting::render_markdown(&report));
    }
    Ok(())
}

fn run_report(file: PathBuf, format: ReportFormat, output: Option<PathBuf>) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("read report {}", file.display()))?;
    let report: ScanReport =
        serde_json::from_str(&raw).with_context(|| format!("parse report {}", file.display()))?;

    let rendered = match format {
        ReportFormat::Markdown => reporting::render_markdown(&report),
        ReportFormat::Json => serde_json::to_string_pretty(&report)?,
        ReportFormat::Sarif => serde_json::to_string_pretty(&reporting::render_sarif(&report))?,
    };

    match output {
        Some(path) => std::fs::write(&path, rendered)
            .with_context(|| format!("write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

fn run_config(init: bool, show: bool, set: Option<String>) -> Result<()> {
    let root = std::env::current_dir()?;

    if init {
        let path = HydraConfig::init_file(&root)?;
        println!("wrote {}", path.display());
    }

    if let Some(ref pair) = set {
        let (key, value) = pair
            .split_once('=')
            .context("--set expects KEY=VAL")?;
        HydraConfig::set_key(&root, key, value)?;
        println!("set {key}");
    }

    if show || (!init && set.is_none()) {
        let config = HydraConfig::load(&root)?;
        print!("{}", config.to_toml()?);
    }
    Ok(())
}
