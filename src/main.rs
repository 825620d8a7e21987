//! devfarm - device farm glue
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use devfarm::cli::{commands, Cli, Commands, LogFormat};
use devfarm::config::ConfigManager;
use devfarm::error::DevfarmResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit status for failures worth retrying (EX_TEMPFAIL)
const EXIT_RETRYABLE: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if e.is_retryable() {
                ExitCode::from(EXIT_RETRYABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run() -> DevfarmResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("devfarm=warn"),
        1 => EnvFilter::new("devfarm=info"),
        _ => EnvFilter::new("devfarm=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.without_time().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    devfarm::ui::init_theme();

    // Completions don't need config loading
    if let Commands::Completions(args) = cli.command {
        commands::completions(args);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load().await?;

    if let Some(dir) = cli.lock_dir {
        debug!("Lock directory overridden: {}", dir.display());
        config.lock.dir = dir;
    }

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Lock(args) => commands::lock(args, &config).await,
        Commands::Merge(args) => commands::merge(args, &config),
        Commands::Inspect(args) => commands::inspect(args),
        Commands::Devices(args) => commands::devices(args, &config).await,
        Commands::Run(args) => commands::run(args, &config).await,
        Commands::Config(args) => commands::config(args, &config_manager, &config).await,
    }
}
