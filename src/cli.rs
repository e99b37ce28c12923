use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "autograder-analysis",
    version,
    about = "Pairwise similarity and individual trend analysis of graded submissions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Pretty-print JSON output (default: compact)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare every pair of the given submissions
    Pairwise {
        /// Submission manifest (YAML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Comma-separated submission ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Return immediately; uncached pairs are computed in the background
        #[arg(long)]
        no_wait: bool,

        /// Identity the course metrics are attributed to
        #[arg(long, default_value = "")]
        requester: String,
    },

    /// Size and trend analysis of each given submission
    Individual {
        /// Submission manifest (YAML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Comma-separated submission ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Return immediately; uncached submissions are computed in the background
        #[arg(long)]
        no_wait: bool,

        /// Identity the course metrics are attributed to
        #[arg(long, default_value = "")]
        requester: String,
    },

    /// Aggregate statistics over an analysis batch
    Summary {
        /// Submission manifest (YAML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Which analysis to summarize
        #[arg(long, value_enum)]
        kind: SummaryKind,

        /// Comma-separated submission ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Round aggregates to this many decimal places
        #[arg(long)]
        precision: Option<u32>,

        /// Identity the course metrics are attributed to
        #[arg(long, default_value = "")]
        requester: String,
    },

    /// Check analysis options (patterns, template specs) read from a file
    ValidateOptions {
        /// YAML or JSON file holding one set of analysis options
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run an analysis task definition
    RunTask {
        /// Submission manifest (YAML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// YAML or JSON task definition
        #[arg(short, long)]
        task: PathBuf,
    },

    /// Manage the analysis cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Check configured engines and tree-sitter grammars
    Doctor,

    /// Generate default configuration file
    Init {
        /// Output path (default: ~/.config/autograder-analysis/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove every cached record and claim
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryKind {
    Pairwise,
    Individual,
}
