//! Common test utilities: topology fixtures and scripted collaborators for
//! driving the build orchestrator without a fleet.

use async_trait::async_trait;
use mirrorgrid::remote::{
    CommandResult, ConfigStore, FaultDetector, RemoteCommandExecutor, ResyncOperation,
    SegmentProbe,
};
use mirrorgrid::{
    BuildServices, ClusterTopology, Dbid, MirrorError, PlannerOptions, Segment, SegmentRole,
    SegmentStatus,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// A mirrorless cluster: `hosts` hosts named sdw1..sdwN, `per_host`
/// primaries each, ports from 40000, dbids from 2, contents from 0.
pub fn primary_only_topology(hosts: usize, per_host: usize) -> ClusterTopology {
    let mut segments = Vec::new();
    let mut dbid: Dbid = 2;
    let mut content = 0;
    for h in 1..=hosts {
        let host = format!("sdw{}", h);
        for p in 0..per_host {
            segments.push(Segment::new_primary(
                dbid,
                content,
                host.as_str(),
                host.as_str(),
                40000 + p as u16,
                format!("/data/primary{}", p),
            ));
            dbid += 1;
            content += 1;
        }
    }
    ClusterTopology::new(segments).expect("valid fixture topology")
}

/// A two-host mirrored pair for content 0 with the mirror failed: the
/// primary is up on sdw1, the mirror is down on sdw2 with recorded status
/// `mirror_status`.
pub fn failed_mirror_topology(mirror_status: SegmentStatus) -> ClusterTopology {
    let primary = Segment::new_primary(2, 0, "sdw1", "sdw1", 40000, "/data/primary0");
    let mut mirror = Segment::new_mirror(3, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
    mirror.status = mirror_status;
    ClusterTopology::new(vec![primary, mirror]).expect("valid fixture topology")
}

/// Fast orchestrator options for tests.
pub fn test_options() -> PlannerOptions {
    let mut options = PlannerOptions::default();
    options.parallel_degree = 4;
    options.max_markdown_retries = 3;
    options.markdown_poll_interval = Duration::from_millis(5);
    options
}

/// Records every command and fails the ones whose command line contains a
/// configured marker.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub fail_marker: Option<String>,
    pub log: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn command_count(&self) -> usize {
        self.log.lock().len()
    }
}

#[async_trait]
impl RemoteCommandExecutor for ScriptedExecutor {
    async fn run(&self, _name: &str, cmd: &str, host: &str) -> mirrorgrid::Result<CommandResult> {
        self.log.lock().push((host.to_string(), cmd.to_string()));
        if let Some(marker) = &self.fail_marker {
            if cmd.contains(marker.as_str()) {
                return Ok(CommandResult {
                    exit_status: 1,
                    stdout: String::new(),
                    stderr: "injected failure".to_string(),
                });
            }
        }
        Ok(CommandResult {
            exit_status: 0,
            stdout: "done".to_string(),
            stderr: String::new(),
        })
    }
}

/// Fault detector that reports every segment down except a configured set
/// that never converges.
#[derive(Default)]
pub struct ScriptedFaultDetector {
    pub never_down: BTreeSet<Dbid>,
}

#[async_trait]
impl FaultDetector for ScriptedFaultDetector {
    async fn is_segment_down(&self, dbid: Dbid) -> mirrorgrid::Result<bool> {
        Ok(!self.never_down.contains(&dbid))
    }
}

/// Probe reporting a fixed set of (host, port) pairs as running.
#[derive(Default)]
pub struct ScriptedProbe {
    pub running: BTreeSet<(String, u16)>,
}

#[async_trait]
impl SegmentProbe for ScriptedProbe {
    async fn is_process_running(&self, host: &str, port: u16) -> mirrorgrid::Result<bool> {
        Ok(self.running.contains(&(host.to_string(), port)))
    }
}

/// Records resynchronizations and fails a configured set of targets.
#[derive(Default)]
pub struct ScriptedResync {
    pub fail_dbids: BTreeSet<Dbid>,
    pub calls: Mutex<Vec<(Dbid, bool)>>,
}

#[async_trait]
impl ResyncOperation for ScriptedResync {
    async fn resynchronize(
        &self,
        _live: &Segment,
        target: &Segment,
        full: bool,
    ) -> mirrorgrid::Result<()> {
        self.calls.lock().push((target.dbid, full));
        if self.fail_dbids.contains(&target.dbid) {
            return Err(MirrorError::Execution(format!(
                "resynchronization of dbid {} failed",
                target.dbid
            )));
        }
        Ok(())
    }
}

/// Captures committed topologies and forced roles.
#[derive(Default)]
pub struct RecordingConfigStore {
    pub commits: Mutex<Vec<(ClusterTopology, BTreeMap<Dbid, SegmentRole>)>>,
}

impl RecordingConfigStore {
    pub fn commit_count(&self) -> usize {
        self.commits.lock().len()
    }
}

#[async_trait]
impl ConfigStore for RecordingConfigStore {
    async fn update_system_config(
        &self,
        topology: &ClusterTopology,
        forced_roles: &BTreeMap<Dbid, SegmentRole>,
        _use_utility_mode: bool,
        _allow_primary: bool,
    ) -> mirrorgrid::Result<()> {
        self.commits
            .lock()
            .push((topology.clone(), forced_roles.clone()));
        Ok(())
    }
}

/// Bundle of scripted collaborators plus the handles tests assert against.
pub struct TestServices {
    pub services: BuildServices,
    pub executor: Arc<ScriptedExecutor>,
    pub resync: Arc<ScriptedResync>,
    pub config_store: Arc<RecordingConfigStore>,
}

pub fn scripted_services(
    executor: ScriptedExecutor,
    fault_detector: ScriptedFaultDetector,
    probe: ScriptedProbe,
    resync: ScriptedResync,
) -> TestServices {
    let executor = Arc::new(executor);
    let resync = Arc::new(resync);
    let config_store = Arc::new(RecordingConfigStore::default());
    let services = BuildServices {
        executor: executor.clone(),
        fault_detector: Arc::new(fault_detector),
        probe: Arc::new(probe),
        resync: resync.clone(),
        config_store: config_store.clone(),
    };
    TestServices {
        services,
        executor,
        resync,
        config_store,
    }
}
