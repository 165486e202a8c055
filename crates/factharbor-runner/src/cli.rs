use clap::{Parser, Subcommand, ValueEnum};
use fh_core::{JobClass, JobStatus};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "fhr")]
#[command(about = "FactHarbor runner: admission control for analysis jobs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.config/factharbor-runner/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler, reaper and admin API until Ctrl-C
    Serve {
        /// Also write logs to serve-<timestamp>.log in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Keep jobs in memory instead of the store file
        #[arg(long)]
        ephemeral: bool,
    },

    /// Submit a job to a running server
    Submit {
        /// Scheduling class
        #[arg(long, value_enum)]
        class: JobClass,

        /// Provider the analysis depends on (repeatable)
        #[arg(long = "provider")]
        providers: Vec<String>,

        /// Tie-break between jobs enqueued at the same instant
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Analysis input passed to the executor
        payload: String,
    },

    /// Cancel a queued or running job
    Cancel {
        /// Job ULID
        id: String,
    },

    /// Show a single job
    Job {
        /// Job ULID
        id: String,
    },

    /// Show provider health and queue state
    Health,

    /// Stop dispatching new jobs
    Pause,

    /// Resume dispatching
    Resume,

    /// List jobs straight from the store file
    Jobs {
        /// Only jobs with this status
        #[arg(long, value_enum, ignore_case = true)]
        status: Option<JobStatus>,

        /// Only jobs of this class
        #[arg(long, value_enum)]
        class: Option<JobClass>,
    },

    /// Show/validate configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print a commented configuration template
    Template,
}
