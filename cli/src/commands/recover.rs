//! `mirrorgrid recover`: rebuild failed segments from their live peers,
//! in place or onto operator-supplied spare locations.

use crate::commands::{report_results, BuildArgs};
use crate::runtime::{
    self, AgentProbe, AgentResync, FileConfigStore, FileFaultDetector, SshExecutor,
};
use anyhow::{bail, Context};
use clap::Args;
use mirrorgrid::config::parse_mirror_config;
use mirrorgrid::{
    BuildOrchestrator, BuildServices, ClusterTopology, MirrorBuildRequest, Segment, SegmentMode,
    SegmentStatus,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Args)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Force a full copy instead of an incremental resynchronization
    #[arg(short = 'F', long)]
    pub full: bool,

    /// Failover layout file, one content|address|port|dataDirectory line per
    /// failed segment to rebuild on a spare location
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,
}

pub async fn execute(args: RecoverArgs, topology_path: &Path) -> anyhow::Result<bool> {
    let mut topology = runtime::load_topology(topology_path)?;
    let options = args.build.to_options(None)?;

    let failover = match &args.input {
        Some(input) => parse_mirror_config(input)
            .with_context(|| format!("reading failover layout {}", input.display()))?
            .into_iter()
            .map(|row| (row.content, row))
            .collect(),
        None => BTreeMap::new(),
    };

    let mut requests = Vec::new();
    for (failed, live) in failed_pairs(&topology)? {
        let request = match failover.get(&failed.content) {
            Some(row) => {
                let target = Segment {
                    dbid: failed.dbid,
                    content: failed.content,
                    role: failed.role,
                    preferred_role: failed.preferred_role,
                    mode: SegmentMode::NotInSync,
                    status: SegmentStatus::Down,
                    hostname: row.address.clone(),
                    address: row.address.clone(),
                    port: row.port,
                    data_directory: row.data_directory.clone(),
                };
                topology.replace_segment(target.clone())?;
                MirrorBuildRequest::failover_to_new(failed, live, target)?
            }
            None => MirrorBuildRequest::recover_in_place(failed, live, args.full)?,
        };
        requests.push(request);
    }

    if requests.is_empty() {
        info!("no failed segments to recover");
        return Ok(true);
    }
    info!(segments = requests.len(), "recovering failed segments");

    let executor: Arc<dyn mirrorgrid::remote::RemoteCommandExecutor> = Arc::new(SshExecutor);
    let services = BuildServices {
        probe: Arc::new(AgentProbe::new(Arc::clone(&executor))),
        resync: Arc::new(AgentResync::new(Arc::clone(&executor))),
        fault_detector: Arc::new(FileFaultDetector::new(topology_path)),
        config_store: Arc::new(FileConfigStore::new(topology_path)),
        executor,
    };

    let orchestrator = BuildOrchestrator::new(requests, services, options);
    let batch = orchestrator.build_mirrors(&mut topology).await?;
    report_results(&batch);
    Ok(batch.success)
}

/// Pair every down data segment with the live, acting-primary peer of its
/// content group.
fn failed_pairs(topology: &ClusterTopology) -> anyhow::Result<Vec<(Segment, Segment)>> {
    let data_segments: Vec<&Segment> = topology
        .segments()
        .iter()
        .filter(|s| s.is_data_segment())
        .collect();

    let mut pairs = Vec::new();
    for (content, peers) in ClusterTopology::group_by_content(&data_segments) {
        let Some(failed) = peers.iter().find(|s| s.status == SegmentStatus::Down) else {
            continue;
        };
        let live = peers
            .iter()
            .find(|s| s.is_up() && s.is_primary() && s.dbid != failed.dbid);
        match live {
            Some(live) => pairs.push(((*failed).clone(), (*live).clone())),
            None => bail!(
                "content {} has a failed segment but no live primary to recover from",
                content
            ),
        }
    }
    Ok(pairs)
}
