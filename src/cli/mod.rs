//! Command-line interface

pub mod commands;
pub mod input;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ClearCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Lead enrichment pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "leadflow")]
#[command(version = "0.1.0")]
#[command(
    about = "Run lead enrichment pipelines: batch enrichment, filters and run analytics",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the run state database (defaults to the user data directory)
    #[arg(long, global = true)]
    pub db: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline over a file of leads
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show the persisted run
    Status(StatusCommand),

    /// Forget the persisted run
    Clear(ClearCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
