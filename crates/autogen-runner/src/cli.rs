use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "autogen",
    author,
    version,
    about = "Advances an ensemble of simulation jobs by one tick.",
    long_about = "Reads a plan of jobs, reconciles it with the records on disk, and moves every job one step further through staging, submission, analysis and recovery."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, default_value = "./plan.toml")]
    pub plan: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Path to a config.toml; defaults to the XDG config home"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,

    #[arg(
        long,
        global = true,
        help = "The scheduler to use: 'local', 'slurm' or 'pbs'. Overrides the configuration."
    )]
    pub scheduler: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Advance every job by one step")]
    Nextstep(NextstepArgs),

    #[command(about = "Show the recorded state of every job in the plan")]
    Status,

    #[command(about = "Summarise execution records found under a directory")]
    Info(InfoArgs),
}

#[derive(Args)]
pub struct NextstepArgs {
    #[arg(
        long,
        help = "Discard records whose configuration no longer matches the plan and start them over"
    )]
    pub reset: bool,

    #[arg(
        long,
        help = "Submit bundle-ready tasks together after the tick"
    )]
    pub bundle: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    #[arg(value_name = "DIR", default_value = ".")]
    pub path: PathBuf,
}
