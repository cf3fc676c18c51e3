//! The parallel build/recovery orchestrator.
//!
//! [`BuildOrchestrator`] turns a batch of [`MirrorBuildRequest`]s into a
//! converged cluster state. Each batch moves through a fixed sequence of
//! phases; segments within a phase proceed in parallel through a
//! [`WorkerPool`] bounded by `min(#distinct hosts, parallel_degree)`:
//!
//! ```text
//! Validating -> StoppingFailed -> WaitingMarkedDown -> Recovering
//!            -> PersistingConfig -> StartingAll -> Done | Failed
//! ```
//!
//! Validation failures abort the whole batch before any mutation. After
//! that, failures are per segment: a segment that times out waiting to be
//! marked down or fails to resynchronize is recorded in its [`BuildResult`]
//! and dropped from later phases while its siblings proceed. Topology
//! changes are committed once, at the persist phase, never from worker
//! tasks.

use crate::cluster::progress::{ProgressReporter, ProgressRow};
use crate::cluster::worker::{CommandMeta, CompletedCommand, RemoteCommand, WorkerPool};
use crate::config::PlannerOptions;
use crate::error::{MirrorError, Result};
use crate::remote::{
    CommandResult, ConfigStore, FaultDetector, RemoteCommandExecutor, ResyncOperation, SegmentProbe,
};
use crate::topology::ClusterTopology;
use crate::types::{
    BuildKind, BuildResult, Dbid, FaultCode, MirrorBuildRequest, Segment, SegmentMode, SegmentRole,
    SegmentStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators the orchestrator drives. All remote effects go through
/// these interfaces.
#[derive(Clone)]
pub struct BuildServices {
    pub executor: Arc<dyn RemoteCommandExecutor>,
    pub fault_detector: Arc<dyn FaultDetector>,
    pub probe: Arc<dyn SegmentProbe>,
    pub resync: Arc<dyn ResyncOperation>,
    pub config_store: Arc<dyn ConfigStore>,
}

/// Phase of a build batch, for logging and operator-facing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Validating,
    StoppingFailed,
    WaitingMarkedDown,
    Recovering,
    PersistingConfig,
    StartingAll,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Validating => "validating",
            BuildPhase::StoppingFailed => "stopping failed segments",
            BuildPhase::WaitingMarkedDown => "waiting for segments to be marked down",
            BuildPhase::Recovering => "recovering",
            BuildPhase::PersistingConfig => "persisting configuration",
            BuildPhase::StartingAll => "starting segments",
        };
        write!(f, "{}", name)
    }
}

/// Aggregated outcome of one batch. Partial success is representable: the
/// caller always receives one [`BuildResult`] per requested segment.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<BuildResult>,
    pub success: bool,
}

impl BatchResult {
    pub fn failures(&self) -> impl Iterator<Item = &BuildResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Drives a batch of build/recovery requests to completion across the fleet.
pub struct BuildOrchestrator {
    requests: Vec<MirrorBuildRequest>,
    services: BuildServices,
    options: PlannerOptions,
}

impl BuildOrchestrator {
    pub fn new(
        requests: Vec<MirrorBuildRequest>,
        services: BuildServices,
        options: PlannerOptions,
    ) -> Self {
        Self {
            requests,
            services,
            options,
        }
    }

    pub fn requests(&self) -> &[MirrorBuildRequest] {
        &self.requests
    }

    /// Execute the batch against `topology`, which must already contain
    /// every target segment (the planner's working topology, or the current
    /// topology with failover targets substituted in).
    ///
    /// Returns `Err` only for whole-batch failures: validation errors before
    /// any mutation, or a failed configuration commit. Per-segment failures
    /// are reported through the returned [`BatchResult`].
    pub async fn build_mirrors(&self, topology: &mut ClusterTopology) -> Result<BatchResult> {
        if self.requests.is_empty() {
            info!("no segments to build");
            return Ok(BatchResult {
                results: Vec::new(),
                success: true,
            });
        }
        self.options.validate()?;

        info!(phase = %BuildPhase::Validating, segments = self.requests.len(), "starting build batch");
        self.validate_batch(topology)?;

        // Per-target failures collected as phases progress; a dbid present
        // here is dropped from all later phases.
        let mut failures: BTreeMap<Dbid, BuildResult> = BTreeMap::new();

        let stopped = self.stop_failed_segments().await?;
        self.wait_marked_down(&stopped, &mut failures).await?;
        self.recover_segments(&mut failures).await?;
        self.persist_configuration(topology, &failures).await?;
        self.start_segments(&mut failures).await?;
        self.cleanup_abandoned_directories(&failures).await;

        let mut results: Vec<BuildResult> = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            let dbid = request.target_segment().dbid;
            results.push(
                failures
                    .get(&dbid)
                    .cloned()
                    .unwrap_or_else(|| BuildResult::ok(dbid)),
            );
        }
        let success = results.iter().all(|r| r.success);
        if success {
            info!("build batch completed successfully");
        } else {
            warn!(
                failed = results.iter().filter(|r| !r.success).count(),
                total = results.len(),
                "build batch completed with failures"
            );
        }
        Ok(BatchResult { results, success })
    }

    /// Whole-batch invariant checks; any violation aborts before any remote
    /// command is issued.
    fn validate_batch(&self, topology: &ClusterTopology) -> Result<()> {
        topology.check_port_and_directory_conflicts()?;

        for request in &self.requests {
            let target = request.target_segment();
            let in_topology = topology.get(target.dbid).ok_or_else(|| {
                MirrorError::Validation(format!(
                    "target segment {} is missing from the new configuration",
                    target
                ))
            })?;

            if let BuildKind::FailoverToNew { failed, .. } = request.kind() {
                if in_topology == failed {
                    return Err(MirrorError::Validation(
                        "failed segment should not be in the new configuration if failing \
                         over to new segment"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Stop every failed segment the probe still reports as running.
    /// Returns the failed segments whose recorded status was up, which must
    /// now be observed down by the fault detector.
    async fn stop_failed_segments(&self) -> Result<Vec<Segment>> {
        let failed: Vec<&Segment> = self
            .requests
            .iter()
            .filter_map(|r| r.failed_segment())
            .collect();
        if failed.is_empty() {
            return Ok(Vec::new());
        }
        info!(phase = %BuildPhase::StoppingFailed, segments = failed.len(), "ensuring failed segments are stopped");

        let mut running: Vec<&Segment> = Vec::new();
        for seg in &failed {
            match self
                .services
                .probe
                .is_process_running(&seg.hostname, seg.port)
                .await
            {
                Ok(true) => running.push(*seg),
                Ok(false) => {
                    debug!(dbid = seg.dbid, host = %seg.hostname, "segment process not running, skipping stop");
                }
                Err(err) => {
                    warn!(dbid = seg.dbid, host = %seg.hostname, error = %err,
                        "could not probe segment process, skipping stop");
                }
            }
        }

        if !running.is_empty() {
            let by_host = ClusterTopology::group_by_host(&running);
            let mut pool = self.phase_pool(by_host.len())?;
            for (host, segs) in &by_host {
                pool.add_command(stop_command(host, segs));
            }
            // Stop errors are tolerated: the stop frequently reports failure
            // after the process is already gone.
            let completed = self.drain_pool(&mut pool, Vec::new()).await?;
            for item in completed.iter().filter(|c| !c.was_successful()) {
                debug!(host = %item.meta.host, reason = ?item.failure_reason(),
                    "stop command reported failure, continuing");
            }
        }

        Ok(failed
            .into_iter()
            .filter(|s| s.status == SegmentStatus::Up)
            .cloned()
            .collect())
    }

    /// Poll the fault detector until each stopped segment is observed down,
    /// bounded by retries x sleep interval. A segment that never converges
    /// is recorded as a timeout failure; its siblings proceed.
    async fn wait_marked_down(
        &self,
        segments: &[Segment],
        failures: &mut BTreeMap<Dbid, BuildResult>,
    ) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }
        let initial = segments.len();
        info!(phase = %BuildPhase::WaitingMarkedDown, segments = initial,
            "waiting for the fault detector; this may take a while on large clusters");

        let mut remaining: BTreeSet<Dbid> = segments.iter().map(|s| s.dbid).collect();
        let mut last_reported = 0usize;
        for _ in 0..self.options.max_markdown_retries {
            let pending: Vec<Dbid> = remaining.iter().copied().collect();
            for dbid in pending {
                match self.services.fault_detector.is_segment_down(dbid).await {
                    Ok(true) => {
                        remaining.remove(&dbid);
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(dbid, error = %err, "fault detector query failed");
                    }
                }
            }
            if remaining.is_empty() {
                break;
            }
            let marked = initial - remaining.len();
            if marked != last_reported {
                info!(marked, total = initial, "segments marked down so far");
                last_reported = marked;
            }
            tokio::time::sleep(self.options.markdown_poll_interval).await;
        }

        if remaining.is_empty() {
            info!(marked = initial, total = initial, "all segments marked down");
        }
        for dbid in remaining {
            warn!(dbid, "segment was not marked down within the retry bound");
            failures.insert(
                dbid,
                BuildResult::failed(
                    dbid,
                    FaultCode::MarkdownTimeout,
                    format!(
                        "segment was not marked down by the fault detector within {} attempts",
                        self.options.max_markdown_retries
                    ),
                ),
            );
        }
        Ok(())
    }

    /// Resynchronize every surviving request's target from its live segment.
    async fn recover_segments(&self, failures: &mut BTreeMap<Dbid, BuildResult>) -> Result<()> {
        let active: Vec<&MirrorBuildRequest> = self
            .requests
            .iter()
            .filter(|r| !failures.contains_key(&r.target_segment().dbid))
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        info!(phase = %BuildPhase::Recovering, segments = active.len(), "resynchronizing segments");

        let targets: Vec<&Segment> = active.iter().map(|r| r.target_segment()).collect();
        let hosts = ClusterTopology::group_by_host(&targets).len();
        let mut pool = self.phase_pool(hosts)?;
        let mut rows = Vec::with_capacity(active.len());
        for request in &active {
            let live = request.live_segment().clone();
            let target = request.target_segment().clone();
            let full = request.is_full_synchronization();
            let resync = Arc::clone(&self.services.resync);
            rows.push(ProgressRow {
                host: target.hostname.clone(),
                dbid: target.dbid,
            });
            let meta = CommandMeta {
                name: format!("resynchronize dbid {}", target.dbid),
                host: target.hostname.clone(),
                dbid: Some(target.dbid),
            };
            pool.add_task(meta, async move {
                resync.resynchronize(&live, &target, full).await?;
                Ok(CommandResult {
                    exit_status: 0,
                    stdout: "resynchronized".to_string(),
                    stderr: String::new(),
                })
            });
        }

        let completed = self.drain_pool(&mut pool, rows).await?;
        for item in completed {
            if let (Some(dbid), Some(reason)) = (item.meta.dbid, item.failure_reason()) {
                warn!(dbid, %reason, "resynchronization failed");
                failures.insert(dbid, BuildResult::failed(dbid, FaultCode::ResyncFailed, reason));
            }
        }
        Ok(())
    }

    /// Commit every surviving request's role/mode/status changes to the
    /// topology in one atomic configuration update, so observers never see
    /// a half-migrated cluster.
    async fn persist_configuration(
        &self,
        topology: &mut ClusterTopology,
        failures: &BTreeMap<Dbid, BuildResult>,
    ) -> Result<()> {
        let active: Vec<&MirrorBuildRequest> = self
            .requests
            .iter()
            .filter(|r| !failures.contains_key(&r.target_segment().dbid))
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        info!(phase = %BuildPhase::PersistingConfig, segments = active.len(),
            "updating configuration with new mirrors");

        let mut forced_roles: BTreeMap<Dbid, SegmentRole> = BTreeMap::new();
        for request in &active {
            let target = request.target_segment();
            let role = match request.kind() {
                BuildKind::AddNewMirror { .. } => SegmentRole::Mirror,
                BuildKind::FailoverToNew { .. } => SegmentRole::Primary,
                BuildKind::RecoverInPlace { failed, .. } => failed.role,
            };
            // Down until started; unsynchronized until resync catches up.
            topology.update_segment(
                target.dbid,
                Some(role),
                Some(SegmentMode::NotInSync),
                Some(SegmentStatus::Down),
            )?;
            topology.update_segment(
                request.live_segment().dbid,
                None,
                Some(SegmentMode::Resyncing),
                None,
            )?;
            forced_roles.insert(target.dbid, role);
        }

        self.services
            .config_store
            .update_system_config(topology, &forced_roles, false, false)
            .await
    }

    /// Start every surviving target segment in parallel, capturing a
    /// per-segment result.
    async fn start_segments(&self, failures: &mut BTreeMap<Dbid, BuildResult>) -> Result<()> {
        let targets: Vec<&Segment> = self
            .requests
            .iter()
            .map(|r| r.target_segment())
            .filter(|s| !failures.contains_key(&s.dbid))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        info!(phase = %BuildPhase::StartingAll, segments = targets.len(), "starting segments");

        let hosts = ClusterTopology::group_by_host(&targets).len();
        let mut pool = self.phase_pool(hosts)?;
        let mut rows = Vec::with_capacity(targets.len());
        for seg in &targets {
            rows.push(ProgressRow {
                host: seg.hostname.clone(),
                dbid: seg.dbid,
            });
            pool.add_command(start_command(seg));
        }

        let completed = self.drain_pool(&mut pool, rows).await?;
        for item in completed {
            if let (Some(dbid), Some(reason)) = (item.meta.dbid, item.failure_reason()) {
                warn!(dbid, %reason,
                    "failed to start segment; the fault detector will shortly mark it down");
                failures.insert(dbid, BuildResult::failed(dbid, FaultCode::StartFailed, reason));
            }
        }
        Ok(())
    }

    /// Remove on-disk leftovers of in-place, forced-full recoveries, batched
    /// per host. Best-effort: failures are logged, never escalated.
    async fn cleanup_abandoned_directories(&self, failures: &BTreeMap<Dbid, BuildResult>) {
        let abandoned: Vec<&Segment> = self
            .requests
            .iter()
            .filter(|r| {
                r.is_forced_full_in_place() && !failures.contains_key(&r.target_segment().dbid)
            })
            .filter_map(|r| r.failed_segment())
            .collect();
        if abandoned.is_empty() {
            return;
        }
        info!(segments = abandoned.len(), "cleaning files from abandoned segment directories");

        let by_host = ClusterTopology::group_by_host(&abandoned);
        let mut pool = match self.phase_pool(by_host.len()) {
            Ok(pool) => pool,
            Err(err) => {
                warn!(error = %err, "could not create cleanup pool");
                return;
            }
        };
        for (host, segs) in &by_host {
            pool.add_command(cleanup_command(host, segs));
        }
        match self.drain_pool(&mut pool, Vec::new()).await {
            Ok(completed) => {
                for item in completed.iter().filter(|c| !c.was_successful()) {
                    warn!(host = %item.meta.host, reason = ?item.failure_reason(),
                        "cleanup of abandoned segment files failed");
                }
            }
            Err(err) => warn!(error = %err, "cleanup phase failed"),
        }
    }

    /// One pool per phase, bounded by min(#distinct hosts, parallel degree).
    fn phase_pool(&self, distinct_hosts: usize) -> Result<WorkerPool> {
        let workers = distinct_hosts.min(self.options.parallel_degree).max(1);
        WorkerPool::new(workers, Arc::clone(&self.services.executor))
    }

    /// Join a phase pool, showing the live status board when interactive.
    /// On an unexpected error, outstanding work is abandoned.
    async fn drain_pool(
        &self,
        pool: &mut WorkerPool,
        rows: Vec<ProgressRow>,
    ) -> Result<Vec<CompletedCommand>> {
        if self.options.interactive_progress && !rows.is_empty() {
            let mut reporter = ProgressReporter::new(
                rows,
                true,
                self.options.markdown_poll_interval.min(std::time::Duration::from_secs(1)),
                std::io::stdout(),
            );
            if let Err(err) = reporter.join_and_show(pool).await {
                pool.halt_work();
                pool.join().await;
                return Err(err);
            }
        } else {
            pool.join().await;
        }
        Ok(pool.completed_items())
    }
}

fn stop_command(host: &str, segments: &[&Segment]) -> RemoteCommand {
    let dirs = segments
        .iter()
        .map(|s| format!("--data-dir {}", s.data_directory.display()))
        .collect::<Vec<_>>()
        .join(" ");
    RemoteCommand::new(
        format!("segment stop on host {}", host),
        format!("mirrorgrid-agent stop --mode fast {}", dirs),
        host,
    )
}

fn start_command(segment: &Segment) -> RemoteCommand {
    RemoteCommand::new(
        format!("start segment dbid {}", segment.dbid),
        format!(
            "mirrorgrid-agent start --data-dir {} --port {} --content {} --dbid {}",
            segment.data_directory.display(),
            segment.port,
            segment.content,
            segment.dbid
        ),
        segment.hostname.clone(),
    )
    .with_dbid(segment.dbid)
}

fn cleanup_command(host: &str, segments: &[&Segment]) -> RemoteCommand {
    let dirs = segments
        .iter()
        .map(|s| format!("--data-dir {}", s.data_directory.display()))
        .collect::<Vec<_>>()
        .join(" ");
    RemoteCommand::new(
        format!("clean segment directories on {}", host),
        format!("mirrorgrid-agent clean {}", dirs),
        host,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_command_batches_directories() {
        let a = Segment::new_mirror(6, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
        let b = Segment::new_mirror(7, 1, "sdw2", "sdw2", 41001, "/data/mirror1");
        let cmd = stop_command("sdw2", &[&a, &b]);
        assert_eq!(cmd.meta.host, "sdw2");
        assert!(cmd.cmd.contains("--data-dir /data/mirror0"));
        assert!(cmd.cmd.contains("--data-dir /data/mirror1"));
    }

    #[test]
    fn test_cleanup_command_batches_directories() {
        let a = Segment::new_mirror(6, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
        let b = Segment::new_mirror(7, 1, "sdw2", "sdw2", 41001, "/data/mirror1");
        let cmd = cleanup_command("sdw2", &[&a, &b]);
        assert_eq!(cmd.meta.host, "sdw2");
        assert!(cmd.cmd.starts_with("mirrorgrid-agent clean"));
        assert!(cmd.cmd.contains("--data-dir /data/mirror0"));
        assert!(cmd.cmd.contains("--data-dir /data/mirror1"));
    }

    #[test]
    fn test_start_command_carries_dbid() {
        let seg = Segment::new_mirror(6, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
        let cmd = start_command(&seg);
        assert_eq!(cmd.meta.dbid, Some(6));
        assert!(cmd.cmd.contains("--port 41000"));
        assert!(cmd.cmd.contains("--dbid 6"));
    }
}
