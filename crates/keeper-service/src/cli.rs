use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keeper_core::JobId;

#[derive(Parser, Debug)]
#[command(name = "keeper-service")]
#[command(version, about = "Scheduled backup service")]
pub struct Cli {
    /// Config file (defaults to ~/.keeper/keeper.toml)
    #[arg(long, global = true, env = "KEEPER_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler until interrupted (default)
    Serve,

    /// Manage backup jobs
    #[command(subcommand)]
    Jobs(JobsCommand),
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List every job with its next planned run
    List,

    /// Print one job as JSON
    Show {
        id: JobId,
    },

    /// Add a job from a JSON file
    Add {
        file: PathBuf,
    },

    /// Delete a job
    Remove {
        id: JobId,
    },

    /// Run a job now, printing progress
    Run {
        id: JobId,

        /// Print engine progress lines as well as the run log
        #[arg(long)]
        progress: bool,
    },
}
