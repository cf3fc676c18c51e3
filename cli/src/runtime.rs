//! Concrete collaborators wired into the build orchestrator.
//!
//! Remote effects run through ssh against the per-host agent; topology
//! state lives in a JSON file shared with the external fault prober.

use async_trait::async_trait;
use mirrorgrid::remote::{
    CommandResult, ConfigStore, FaultDetector, RemoteCommandExecutor, ResyncOperation,
    SegmentProbe,
};
use mirrorgrid::{ClusterTopology, Dbid, MirrorError, Segment, SegmentRole, SegmentStatus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Runs commands on cluster hosts over ssh in batch mode.
pub struct SshExecutor;

#[async_trait]
impl RemoteCommandExecutor for SshExecutor {
    async fn run(&self, name: &str, cmd: &str, host: &str) -> mirrorgrid::Result<CommandResult> {
        debug!(%name, %host, %cmd, "running remote command");
        let output = tokio::process::Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(host)
            .arg(cmd)
            .output()
            .await?;
        Ok(CommandResult {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Checks for a listening segment process via the remote agent.
pub struct AgentProbe {
    executor: Arc<dyn RemoteCommandExecutor>,
}

impl AgentProbe {
    pub fn new(executor: Arc<dyn RemoteCommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl SegmentProbe for AgentProbe {
    async fn is_process_running(&self, host: &str, port: u16) -> mirrorgrid::Result<bool> {
        let result = self
            .executor
            .run(
                "probe segment process",
                &format!("mirrorgrid-agent status --port {}", port),
                host,
            )
            .await?;
        Ok(result.was_successful())
    }
}

/// Drives the agent's data-copy procedure on the target host.
pub struct AgentResync {
    executor: Arc<dyn RemoteCommandExecutor>,
}

impl AgentResync {
    pub fn new(executor: Arc<dyn RemoteCommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ResyncOperation for AgentResync {
    async fn resynchronize(
        &self,
        live: &Segment,
        target: &Segment,
        full: bool,
    ) -> mirrorgrid::Result<()> {
        let mut cmd = format!(
            "mirrorgrid-agent resync --source {}:{} --target-dir {} --target-port {}",
            live.address,
            live.port,
            target.data_directory.display(),
            target.port
        );
        if full {
            cmd.push_str(" --full");
        }
        let result = self
            .executor
            .run("resynchronize segment", &cmd, &target.hostname)
            .await?;
        if result.was_successful() {
            Ok(())
        } else {
            Err(MirrorError::CommandFailed {
                name: "resynchronize segment".to_string(),
                host: target.hostname.clone(),
                exit_status: result.exit_status,
                stderr: result.stderr,
            })
        }
    }
}

/// Topology persistence backed by a JSON state file. Writes go through a
/// sibling temp file and a rename so readers never observe a partial file.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn update_system_config(
        &self,
        topology: &ClusterTopology,
        forced_roles: &BTreeMap<Dbid, SegmentRole>,
        _use_utility_mode: bool,
        _allow_primary: bool,
    ) -> mirrorgrid::Result<()> {
        debug!(segments = topology.segments().len(), forced = forced_roles.len(),
            path = %self.path.display(), "persisting topology");
        save_topology(&self.path, topology)
    }
}

/// Reads segment status from the state file the external fault prober
/// maintains.
pub struct FileFaultDetector {
    path: PathBuf,
}

impl FileFaultDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FaultDetector for FileFaultDetector {
    async fn is_segment_down(&self, dbid: Dbid) -> mirrorgrid::Result<bool> {
        let topology = load_topology(&self.path)?;
        match topology.get(dbid) {
            Some(segment) => Ok(segment.status == SegmentStatus::Down),
            None => Err(MirrorError::Validation(format!(
                "unknown segment dbid {} in {}",
                dbid,
                self.path.display()
            ))),
        }
    }
}

pub fn load_topology(path: &Path) -> mirrorgrid::Result<ClusterTopology> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn save_topology(path: &Path, topology: &ClusterTopology) -> mirrorgrid::Result<()> {
    let raw = serde_json::to_vec_pretty(topology)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, raw)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
