//! `mirrorgrid add`: place and build mirrors for a mirrorless cluster.

use crate::commands::{compute_plan, report_results, BuildArgs, PlacementArgs};
use crate::runtime::{
    self, AgentProbe, AgentResync, FileConfigStore, FileFaultDetector, SshExecutor,
};
use clap::Args;
use mirrorgrid::{BuildOrchestrator, BuildServices};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub placement: PlacementArgs,

    #[command(flatten)]
    pub build: BuildArgs,
}

pub async fn execute(args: AddArgs, topology_path: &Path) -> anyhow::Result<bool> {
    let topology = runtime::load_topology(topology_path)?;
    let options = args.build.to_options(Some(&args.placement))?;

    let plan = compute_plan(topology, &args.placement)?;
    info!(mirrors = plan.requests.len(), "placing and building mirrors");

    let executor: Arc<dyn mirrorgrid::remote::RemoteCommandExecutor> = Arc::new(SshExecutor);
    let services = BuildServices {
        probe: Arc::new(AgentProbe::new(Arc::clone(&executor))),
        resync: Arc::new(AgentResync::new(Arc::clone(&executor))),
        fault_detector: Arc::new(FileFaultDetector::new(topology_path)),
        config_store: Arc::new(FileConfigStore::new(topology_path)),
        executor,
    };

    let mut topology = plan.topology.clone();
    let orchestrator = BuildOrchestrator::new(plan.requests, services, options);
    let batch = orchestrator.build_mirrors(&mut topology).await?;
    report_results(&batch);
    Ok(batch.success)
}
