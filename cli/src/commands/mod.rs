//! Subcommand implementations and their shared argument groups.

pub mod add;
pub mod plan;
pub mod recover;

use anyhow::Context;
use clap::Args;
use mirrorgrid::cluster::MirrorPlan;
use mirrorgrid::config::{parse_mirror_config, read_data_directories};
use mirrorgrid::{BatchResult, ClusterTopology, MirrorPlanner, MirrorStrategy, PlannerOptions};
use std::path::PathBuf;
use tracing::{info, warn};

/// Flags that drive mirror placement.
#[derive(Args)]
pub struct PlacementArgs {
    /// Placement strategy (spread or grouped); ignored with --input
    #[arg(short, long, default_value = "grouped")]
    pub strategy: String,

    /// Mirror layout file, one content|address|port|dataDirectory line per
    /// mirror, overriding computed placement
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// File listing one mirror data directory per line, reused on every host
    #[arg(short = 'm', long)]
    pub mirror_data_dirs: Option<PathBuf>,

    /// Offset added to primary port bases when deriving mirror ports
    #[arg(short = 'p', long, default_value_t = 1000, allow_hyphen_values = true)]
    pub port_offset: i32,
}

/// Flags that drive the build orchestration.
#[derive(Args)]
pub struct BuildArgs {
    /// Maximum concurrent remote operations per phase
    #[arg(short = 'B', long, default_value_t = 16)]
    pub parallel_degree: usize,

    /// Show a live in-place progress board during long phases
    #[arg(long)]
    pub progress: bool,
}

impl BuildArgs {
    pub fn to_options(&self, placement: Option<&PlacementArgs>) -> anyhow::Result<PlannerOptions> {
        let mut options = PlannerOptions::default();
        if let Some(placement) = placement {
            options.strategy = placement.strategy.parse()?;
            options.port_offset = placement.port_offset;
        }
        options.parallel_degree = self.parallel_degree;
        options.interactive_progress = self.progress;
        options.validate()?;
        Ok(options)
    }
}

/// Compute a placement plan from an operator-supplied layout file or from
/// the chosen strategy.
pub fn compute_plan(
    topology: ClusterTopology,
    args: &PlacementArgs,
) -> anyhow::Result<MirrorPlan> {
    let plan = if let Some(input) = &args.input {
        let rows = parse_mirror_config(input)
            .with_context(|| format!("reading mirror layout {}", input.display()))?;
        let planner = MirrorPlanner::new(topology, Vec::new(), args.port_offset)?;
        planner.plan_from_rows(&rows)?
    } else {
        let strategy: MirrorStrategy = args.strategy.parse()?;
        let dirs_file = args.mirror_data_dirs.as_ref().context(
            "either --input or --mirror-data-dirs is required to place mirrors",
        )?;

        let mut options = PlannerOptions::default();
        options.port_offset = args.port_offset;
        options.check_port_offset(&topology)?;

        let primaries = topology.primaries();
        let per_host = ClusterTopology::group_by_host(&primaries)
            .values()
            .map(|segs| segs.len())
            .max()
            .unwrap_or(0);
        let dirs = read_data_directories(dirs_file, per_host)?;

        let planner = MirrorPlanner::new(topology, dirs, args.port_offset)?;
        match strategy {
            MirrorStrategy::Spread => planner.spread_mirrors()?,
            MirrorStrategy::Grouped => planner.group_mirrors()?,
        }
    };

    for warning in &plan.warnings {
        warn!("{}", warning);
    }
    Ok(plan)
}

/// Print per-segment outcomes and summarize the batch.
pub fn report_results(batch: &BatchResult) {
    for result in &batch.results {
        if result.success {
            info!(dbid = result.dbid, "segment built successfully");
        } else {
            warn!(
                dbid = result.dbid,
                fault = ?result.fault_code,
                reason = %result.reason,
                "segment build failed"
            );
        }
    }
    let failed = batch.results.iter().filter(|r| !r.success).count();
    if batch.success {
        info!(segments = batch.results.len(), "all segments built");
    } else {
        warn!(failed, total = batch.results.len(), "some segments failed to build");
    }
}
