//! CLI entry and dispatch.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use keel_core::config::{KeelConfig, paths};

mod commands;

#[derive(Parser)]
#[command(name = "keel")]
#[command(version = "0.2")]
#[command(about = "Resource-lifecycle runtime for long-running agent processes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to an alternate config file
    #[arg(long, value_name = "PATH")]
    config: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the runtime in the foreground until a shutdown signal arrives
    Run,
    /// Print a memory and cache status snapshot
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Print the effective configuration
    Show,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Only the long-running command mirrors diagnostics into a file.
    let wants_file_log = matches!(cli.command, None | Some(Commands::Run));
    let _appender_guard = init_tracing(wants_file_log);

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

fn init_tracing(log_to_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

    if log_to_file && std::fs::create_dir_all(paths::keel_home()).is_ok() {
        let appender = tracing_appender::rolling::daily(paths::keel_home(), "keel.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
        return Some(guard);
    }

    registry.init();
    None
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => KeelConfig::load_from(Path::new(path)),
        None => KeelConfig::load(),
    }
    .context("load config")?;

    // default to running in the foreground
    let Some(command) = cli.command else {
        return commands::run::run(config).await;
    };

    match command {
        Commands::Run => commands::run::run(config).await,
        Commands::Status => commands::status::run(config),
        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config::path(),
            ConfigCommands::Show => commands::config::show(&config),
        },
    }
}
