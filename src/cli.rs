use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "coworker")]
#[command(about = "Ingest, classify and archive workspace documents", long_about = None)]
pub struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the workspace folder structure
    Init,
    /// Process the inbox: classify, route and archive documents
    Run {
        /// Copy instead of move; sources are left untouched
        #[arg(long)]
        safe: bool,
        /// Include fingerprints, confidence and token columns in reports
        #[arg(long)]
        dev: bool,
    },
    /// Restore the files moved by a run (latest when no id is given)
    Undo {
        /// Run id, e.g. 20240301_120000
        run_id: Option<String>,
    },
    /// Show aggregate statistics over all recorded runs
    Status,
    /// Print configuration values
    PrintConfig,
    /// Display the number of entries in the classification cache
    CacheStats,
}
