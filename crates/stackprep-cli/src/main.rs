mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackprep", about = "Batch preprocessing of astronomical frames")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify input frames and show the resulting groups
    Groups(commands::groups::GroupsArgs),
    /// Check inputs and parameters before a run
    Diagnose(commands::diagnose::DiagnoseArgs),
    /// Print or save the default parameters as TOML
    Config(commands::config::ConfigArgs),
    /// Run the full preprocessing pipeline
    Run(commands::run::RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Groups(args) => commands::groups::run(args),
        Commands::Diagnose(args) => commands::diagnose::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Run(args) => commands::run::run(args),
    }
}
