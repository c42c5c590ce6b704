//! Kiln CLI: inspect and maintain the persisted state of kiln asset builds.
//!
//! Provides `kiln status` for a summary of the build history and cache,
//! `kiln history` to show build records, `kiln cache verify|gc` to check and
//! collect the build cache, and `kiln hash` to print file content hashes.

#![warn(missing_docs)]

mod cache;
mod hash;
mod history;
mod project;
mod status;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

/// Kiln: incremental asset builds.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln asset build tool")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file or project directory.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize the build history and build cache.
    Status,
    /// Show build history records.
    History(HistoryArgs),
    /// Verify or collect the build cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Print the 32-bit content hash of files.
    Hash {
        /// Files to hash.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Arguments for the `kiln history` subcommand.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Output identifier to show in full. Lists every record if omitted.
    pub guid: Option<String>,
}

/// `kiln cache` subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheCommand {
    /// Decode every entry and report corrupt or incomplete ones.
    Verify,
    /// Remove entries the build history no longer refers to.
    Gc {
        /// Only count what would be removed.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

impl GlobalArgs {
    /// The log filter implied by the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` overrides the flags.
fn init_tracing(global: &GlobalArgs) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(global.log_filter()));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Status => status::run(&global),
        Command::History(ref args) => history::run(args, &global),
        Command::Cache(ref command) => cache::run(command, &global),
        Command::Hash { ref files } => hash::run(files),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
