//! mirrorgrid CLI: plan mirror placement and drive builds and recoveries.

use clap::{Parser, Subcommand};
use mirrorgrid::MirrorError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod runtime;

use commands::{add, plan, recover};

/// Mirror placement and recovery for sharded clusters
#[derive(Parser)]
#[command(name = "mirrorgrid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Cluster topology state file
    #[arg(short, long, env = "MIRRORGRID_TOPOLOGY")]
    topology: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute mirror placement without touching the cluster
    Plan(plan::PlanArgs),

    /// Place and build mirrors for a cluster without them
    Add(add::AddArgs),

    /// Rebuild failed segments from their live peers
    Recover(recover::RecoverArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Plan(args) => plan::execute(args, &cli.topology).await,
        Commands::Add(args) => add::execute(args, &cli.topology).await,
        Commands::Recover(args) => recover::execute(args, &cli.topology).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = match err.downcast_ref::<MirrorError>() {
                Some(e) if e.is_validation() => 2,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}
