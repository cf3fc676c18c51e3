//! Collaborator interfaces consumed by the build orchestrator.
//!
//! Transport, fault detection, resynchronization, and configuration
//! persistence all live outside this crate; the orchestrator drives them
//! through these narrow async traits.

use crate::error::Result;
use crate::topology::ClusterTopology;
use crate::types::{Dbid, Segment, SegmentRole};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Captured output of one remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn was_successful(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs a named shell command on a target host.
#[async_trait]
pub trait RemoteCommandExecutor: Send + Sync {
    async fn run(&self, name: &str, cmd: &str, host: &str) -> Result<CommandResult>;
}

/// External subsystem that independently monitors segment liveness.
#[async_trait]
pub trait FaultDetector: Send + Sync {
    async fn is_segment_down(&self, dbid: Dbid) -> Result<bool>;
}

/// Remote process probe: is a live segment process listening at the
/// recorded port on the given host.
#[async_trait]
pub trait SegmentProbe: Send + Sync {
    async fn is_process_running(&self, host: &str, port: u16) -> Result<bool>;
}

/// The opaque data-copy procedure bringing a target up to date with its
/// live counterpart.
#[async_trait]
pub trait ResyncOperation: Send + Sync {
    async fn resynchronize(&self, live: &Segment, target: &Segment, full: bool) -> Result<()>;
}

/// Persists topology changes as a single atomic commit. The external
/// catalog layer guards commits with an exclusive write lock; two
/// orchestrator batches never commit interleaved.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn update_system_config(
        &self,
        topology: &ClusterTopology,
        forced_roles: &BTreeMap<Dbid, SegmentRole>,
        use_utility_mode: bool,
        allow_primary: bool,
    ) -> Result<()>;
}
