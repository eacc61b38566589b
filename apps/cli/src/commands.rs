//! CLI definition, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetmirror_crawler::{MirrorReport, ProgressReporter, run_mirror};
use assetmirror_shared::{
    AppConfig, ConfigOverrides, MirrorConfig, NamespacePath, init_config, load_config,
    load_config_from,
};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// assetmirror: mirror a remote asset namespace to local disk.
#[derive(Parser)]
#[command(
    name = "assetmirror",
    version,
    about = "Mirror a hierarchical remote asset repository into a local directory tree.",
    long_about = None,
    args_conflicts_with_subcommands = true,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub mirror: MirrorArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options of a mirror run. Unset values fall back to the config file.
#[derive(Args, Debug)]
pub(crate) struct MirrorArgs {
    /// Service endpoint URL.
    #[arg(long, env = "ENDPOINT_URL")]
    pub endpoint: Option<String>,

    /// Authentication domain.
    #[arg(long, env = "DOMAIN")]
    pub domain: Option<String>,

    /// User name.
    #[arg(short, long, env = "USERNAME")]
    pub username: Option<String>,

    /// Password. Prefer the environment variable over the flag.
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Namespace to start from.
    #[arg(short, long, env = "BASE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Output root directory.
    #[arg(short, long, env = "OUTPUT_ROOT")]
    pub output: Option<PathBuf>,

    /// Config file (defaults to ~/.assetmirror/assetmirror.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Records per enumeration page.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Ceiling on records requested per namespace.
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Maximum namespace and child-asset recursion depth.
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Concurrent service calls.
    #[arg(short = 'j', long)]
    pub concurrency: Option<u32>,

    /// Fetch the metadata snapshot with its own retrieval.
    #[arg(long)]
    pub separate_metadata: bool,

    /// Also dump every asset element, children included, as JSON under `json/`.
    #[arg(long)]
    pub record_elements: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Overall run deadline in seconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Write the run report as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Exit non-zero when any namespace or asset failed.
    #[arg(long)]
    pub strict: bool,
}

impl MirrorArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            domain: self.domain.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            base_namespace: self.namespace.clone(),
            output_root: self.output.clone(),
            page_size: self.page_size,
            max_results: self.max_results,
            max_depth: self.max_depth,
            concurrency: self.concurrency,
            separate_metadata_fetch: self.separate_metadata.then_some(true),
            record_elements: self.record_elements.then_some(true),
            request_timeout_secs: self.timeout,
            run_timeout_secs: self.deadline,
        }
    }
}

/// Top-level CLI subcommands. Without one, a mirror run starts.
#[derive(Subcommand)]
pub(crate) enum Command {
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
    Init,
    /// Show the config file contents merged with defaults.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "assetmirror=info",
        1 => "assetmirror=debug",
        _ => "assetmirror=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    match cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.mirror.config.as_deref()).await,
        },
        None => cmd_mirror(&cli.mirror).await,
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn cmd_mirror(args: &MirrorArgs) -> Result<()> {
    let file_config = read_config(args.config.as_deref())?;
    let config = MirrorConfig::resolve(&file_config, args.overrides())?;

    info!(
        endpoint = %config.endpoint,
        namespace = %config.base_namespace,
        output_root = %config.output_root.display(),
        "mirroring namespace"
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_ctrl_c.cancel();
        }
    });

    let reporter = Arc::new(CliProgress::new());
    let report = run_mirror(&config, cancel, reporter).await?;

    print_summary(&report, &config.base_namespace, &config.output_root);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    println!("done");

    if args.strict && !report.is_complete() {
        return Err(eyre!(
            "mirror incomplete: {} failure(s){}",
            report.failures(),
            if report.cancelled { ", cancelled" } else { "" }
        ));
    }

    Ok(())
}

fn print_summary(report: &MirrorReport, namespace: &NamespacePath, output_root: &Path) {
    println!();
    if report.is_complete() {
        println!("  Mirror complete.");
    } else if report.cancelled {
        println!("  Mirror cancelled before completion.");
    } else {
        println!("  Mirror finished with failures.");
    }
    println!("  Namespace:   {namespace}");
    println!("  Output:      {}", output_root.display());
    println!(
        "  Namespaces:  {} visited, {} failed",
        report.namespaces_visited, report.namespaces_failed
    );
    println!(
        "  Assets:      {} fetched ({} via fallback), {} failed",
        report.assets_fetched, report.assets_via_fallback, report.assets_failed
    );
    println!(
        "  Snapshots:   {} written, {} unchanged",
        report.snapshots_written, report.snapshots_unchanged
    );
    println!(
        "  Skipped:     {} malformed, {} duplicate, {} beyond depth",
        report.records_skipped, report.duplicates_skipped, report.depth_limited
    );
    if let Some(duration) = report.duration() {
        println!(
            "  Time:        {:.1}s",
            duration.num_milliseconds() as f64 / 1000.0
        );
    }
    for error in report.errors.iter().take(10) {
        println!("  ! {}: {}", error.subject, error.message);
    }
    if report.errors.len() > 10 {
        println!("  ! ... and {} more", report.errors.len() - 10);
    }
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn namespace_started(&self, namespace: &NamespacePath) {
        self.spinner.set_message(format!("Enumerating {namespace}"));
    }

    fn asset_mirrored(&self, id: &str, local_path: &Path, fetched: usize) {
        self.spinner.set_message(format!(
            "Mirrored [{fetched}] {} ({id})",
            local_path.display()
        ));
    }

    fn done(&self, _report: &MirrorReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
