//! CLI command definitions

use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Leads to process (JSON array or JSON Lines)
    #[arg(short, long, required_unless_present = "resume")]
    pub input: Option<String>,

    /// Where to write the processed rows (JSON array)
    #[arg(short, long)]
    pub output: String,

    /// Rows per enrichment call (overrides the pipeline file)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Keep run state in memory only
    #[arg(long)]
    pub no_persist: bool,

    /// Continue the persisted run instead of starting a new one
    #[arg(long, conflicts_with = "no_persist")]
    pub resume: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the persisted run
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Storage key of the run (defaults to the standard run key)
    #[arg(long)]
    pub key: Option<String>,
}

/// Forget the persisted run
#[derive(Debug, Args, Clone)]
pub struct ClearCommand {
    /// Storage key to clear (defaults to the standard run key)
    #[arg(long)]
    pub key: Option<String>,
}
