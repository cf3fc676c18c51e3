//! `mirrorgrid plan`: compute mirror placement without touching the fleet.

use crate::commands::{compute_plan, PlacementArgs};
use crate::runtime;
use clap::Args;
use mirrorgrid::config::{format_plan_line, write_mirror_config};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub placement: PlacementArgs,

    /// Write the plan to this file instead of stdout, in a format --input
    /// accepts
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: PlanArgs, topology_path: &Path) -> anyhow::Result<bool> {
    let topology = runtime::load_topology(topology_path)?;
    let plan = compute_plan(topology, &args.placement)?;
    let mirrors = plan.mirrors();

    match &args.output {
        Some(path) => {
            write_mirror_config(path, &mirrors)?;
            info!(mirrors = mirrors.len(), file = %path.display(), "wrote placement plan");
        }
        None => {
            for mirror in &mirrors {
                println!("{}", format_plan_line(mirror));
            }
            info!(mirrors = mirrors.len(), "computed placement plan");
        }
    }
    Ok(true)
}
