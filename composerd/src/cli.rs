//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// composerd - drive a text-composition engine session from the terminal
#[derive(Parser)]
#[command(
    name = "composerd",
    about = "Engine session coordinator for a non-reentrant text-composition engine",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute (defaults to repl)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive session: type keys, watch the composition
    Repl,

    /// Feed a key sequence and print the result
    Simulate {
        /// Key sequence, e.g. "nihao{space}"
        sequence: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available schemas
    Schemas,

    /// Print the effective configuration
    Config,
}

/// Path of the log file written by the binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("composerd")
        .join("logs")
        .join("composerd.log")
}
