//! Command line argument parsing
//!
//! Subcommands:
//! - `inspect`: Print the last persisted session record
//! - `demo`: Run a counter that autosaves and dumps on Ctrl-C
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sessionkeeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persist and recover application session snapshots")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the last persisted session record
    Inspect {
        /// Session file (overrides the configured path)
        #[arg(short = 'p', long = "path")]
        path: Option<PathBuf>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Run a demo counter with autosave and shutdown dumps
    Demo {
        /// Session file (overrides the configured path)
        #[arg(short = 'p', long = "path")]
        path: Option<PathBuf>,
        /// Autosave interval in milliseconds (0 disables autosave)
        #[arg(long = "autosave-ms", value_name = "MS")]
        autosave_ms: Option<u64>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }
}
