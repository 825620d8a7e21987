//! CLI argument definitions using clap derive

use crate::config::check_timeout_secs;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// devfarm - device farm glue for on-device model builds
///
/// Serializes access to attached devices across processes and merges the
/// compiled binary caches that device runs produce.
#[derive(Parser, Debug)]
#[command(name = "devfarm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEVFARM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding device lock files (overrides lock.dir)
    #[arg(long, global = true, env = "DEVFARM_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect device locks or run a command while holding one
    Lock(LockArgs),

    /// Merge compiled binary caches into one file
    Merge(MergeArgs),

    /// List the records of a compiled binary cache
    Inspect(InspectArgs),

    /// List attached devices
    Devices(DevicesArgs),

    /// Push a binary to a device and run it under the device lock
    Run(RunArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the lock command
#[derive(Parser, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Lock subcommands
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show whether devices are locked and by whom
    Status {
        /// Device serials
        #[arg(required = true)]
        devices: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Run a host command while holding a device lock
    Run {
        /// Device serial
        device: String,

        /// Seconds to wait for the lock (defaults to lock.timeout_secs)
        #[arg(short, long, value_parser = parse_timeout)]
        timeout: Option<f64>,

        /// Purpose recorded in the lock file while held
        #[arg(short, long)]
        purpose: Option<String>,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Arguments for the merge command
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Output file for the merged cache
    #[arg(short, long)]
    pub output: PathBuf,

    /// Key whose value must agree across all inputs (defaults to cache.platform_info_key)
    #[arg(long)]
    pub platform_key: Option<String>,

    /// Treat inputs as run output directories holding <subdir>/<file-name>
    #[arg(long)]
    pub from_dirs: bool,

    /// Cache file name inside each run directory (with --from-dirs)
    #[arg(long, requires = "from_dirs")]
    pub file_name: Option<String>,

    /// Input caches (or run directories), merged in order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Cache file to read
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the devices command
#[derive(Parser, Debug)]
pub struct DevicesArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Device serial
    pub serial: String,

    /// Host binary to push and run
    pub binary: PathBuf,

    /// Seconds to wait for the device lock (defaults to lock.timeout_secs)
    #[arg(short, long, value_parser = parse_timeout)]
    pub timeout: Option<f64>,

    /// After the run, pull the compiled cache into this directory
    #[arg(long)]
    pub collect: Option<PathBuf>,

    /// Compiled cache file name on the device (defaults to cache.compiled_program_file)
    #[arg(long, requires = "collect")]
    pub file_name: Option<String>,

    /// Arguments passed to the binary
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Seconds to wait for a lock: finite and not negative
fn parse_timeout(s: &str) -> Result<f64, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", s))?;
    check_timeout_secs(secs)
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Format of log lines written to stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
