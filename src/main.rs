use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hubmirror::config::Overrides;
use hubmirror::{Config, ConsoleReporter, Layout, Reporter, Settings, SyncEngine};

#[derive(Parser)]
#[command(name = "hubmirror")]
#[command(about = "Mirror every GitHub repository of an account into a local directory")]
#[command(
    long_about = "Mirror every GitHub repository of an account into a local directory.\n\n\
                  Missing repositories are cloned, existing ones are fast-forwarded. \
                  At least one of --account or --secret must be specified."
)]
#[command(version)]
struct Cli {
    /// Directory to mirror the repositories into
    directory: Option<PathBuf>,

    /// GitHub user or organization to mirror; without it, every repository
    /// the secret has access to is mirrored
    #[arg(short, long)]
    account: Option<String>,

    /// GitHub API token; raises rate limits and enables private repositories
    #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    secret: Option<String>,

    /// Repositories to skip, e.g. repo-a,repo-b
    #[arg(long, value_name = "LIST")]
    skip: Option<String>,

    /// Number of repositories synced concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Local directory layout
    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// GitHub API base URL (for GitHub Enterprise)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Suppress progress output; errors are still printed
    #[arg(short = 'q', long)]
    silent: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    init_logging(cli.verbose, &config)?;
    debug!("Starting hubmirror v{}", env!("CARGO_PKG_VERSION"));

    let overrides = Overrides {
        account: cli.account,
        secret: cli.secret,
        directory: cli.directory,
        skip: cli.skip,
        workers: cli.workers,
        layout: cli.layout,
        api_url: cli.api_url,
    };
    let settings = Settings::resolve(overrides, &config)?;
    debug!("Resolved settings: {:?}", settings);

    let reporter: Arc<dyn Reporter> = if cli.silent {
        Arc::new(ConsoleReporter::silent())
    } else {
        Arc::new(ConsoleReporter::new())
    };

    let engine = SyncEngine::github(&settings, reporter)?;
    let summary = engine.run(&settings).await?;

    info!(
        "Mirrored {} repositories into {}",
        summary.successful(),
        settings.directory.display()
    );
    Ok(())
}

/// Initialize logging to stderr
///
/// RUST_LOG wins, then -v/-vv, then the configured level.
fn init_logging(verbose: u8, config: &Config) -> Result<()> {
    let fallback = match verbose {
        0 => config.logging.level.as_str(),
        1 => "warn,hubmirror=info",
        _ => "info,hubmirror=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.logging.color),
        )
        .with(filter)
        .try_init()?;

    Ok(())
}
