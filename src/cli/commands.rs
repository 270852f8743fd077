use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "symposium", about = "Multi-agent brainstorming workflow engine")]
pub struct Cli {
    /// Path to a TOML config file. Defaults built in when absent.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the checkpoint database.
    #[arg(long, global = true, default_value = ".symposium")]
    pub data_dir: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new brainstorming session for a request.
    Run {
        request: String,

        /// Run without the interactive interrupt prompt.
        #[arg(long)]
        autonomous: bool,

        #[arg(long)]
        max_iterations: Option<u32>,

        #[arg(long)]
        quality_threshold: Option<f64>,
    },

    /// Resume a session from its latest checkpoint.
    Resume {
        session_id: String,

        #[arg(long)]
        autonomous: bool,
    },

    /// List known sessions and their latest checkpoint state.
    List,

    /// Show a session's history from its latest checkpoint.
    Show { session_id: String },
}
