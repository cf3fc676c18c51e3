//! Core type definitions for mirrorgrid.
//!
//! This module contains the fundamental data types used throughout the
//! planner and the build orchestrator: the [`Segment`] record describing a
//! single database instance, the [`MirrorBuildRequest`] unit of work, and the
//! per-segment [`BuildResult`] outcome.
//!
//! # Key Types
//!
//! - [`Segment`]: one database instance (primary or mirror) with its
//!   placement attributes (host, address, port, data directory).
//! - [`MirrorBuildRequest`]: a planned or requested build/recovery of one
//!   mirror, expressed as a tagged [`BuildKind`] so the scenario never has to
//!   be inferred from which optional fields happen to be set.
//! - [`BuildResult`] / [`FaultCode`]: per-segment outcome of a batch,
//!   distinguishing execution failures from fault-detector timeouts.
//!
//! # Example
//!
//! ```rust
//! use mirrorgrid::types::{Segment, SegmentRole};
//!
//! let primary = Segment::new_primary(2, 0, "sdw1", "sdw1-1", 40000, "/data/primary0");
//! assert!(primary.is_primary());
//! assert_eq!(primary.role, SegmentRole::Primary);
//! ```

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Cluster-wide unique identifier for a segment instance.
pub type Dbid = i32;

/// Logical shard identifier. All segments sharing a content id form one
/// primary/mirror pair.
pub type ContentId = i32;

/// Content id reserved for the coordinator instance.
pub const COORDINATOR_CONTENT: ContentId = -1;

/// Role of a segment within its content pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentRole {
    Primary,
    Mirror,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentRole::Primary => write!(f, "primary"),
            SegmentRole::Mirror => write!(f, "mirror"),
        }
    }
}

/// Sync state of a segment relative to its counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    NotInSync,
    Resyncing,
    Synchronized,
}

/// Liveness of a segment as last observed by the fault detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Up,
    Down,
}

/// One database instance in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Cluster-wide unique identifier, assigned monotonically.
    pub dbid: Dbid,
    /// Logical shard identifier; -1 is reserved for the coordinator.
    pub content: ContentId,
    /// Current role.
    pub role: SegmentRole,
    /// Role to resume after rebalancing.
    pub preferred_role: SegmentRole,
    /// Sync state relative to the counterpart segment.
    pub mode: SegmentMode,
    /// Liveness as last observed by the fault detector.
    pub status: SegmentStatus,
    /// Physical host the segment runs on.
    pub hostname: String,
    /// Network-reachable name; may differ from the hostname when hosts carry
    /// multiple interfaces.
    pub address: String,
    /// Listen port.
    pub port: u16,
    /// Segment data directory.
    pub data_directory: PathBuf,
}

impl Segment {
    /// Convenience constructor for an up, synchronized primary.
    pub fn new_primary(
        dbid: Dbid,
        content: ContentId,
        hostname: &str,
        address: &str,
        port: u16,
        data_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dbid,
            content,
            role: SegmentRole::Primary,
            preferred_role: SegmentRole::Primary,
            mode: SegmentMode::Synchronized,
            status: SegmentStatus::Up,
            hostname: hostname.to_string(),
            address: address.to_string(),
            port,
            data_directory: data_directory.into(),
        }
    }

    /// Convenience constructor for a brand-new, not-yet-synchronized mirror.
    pub fn new_mirror(
        dbid: Dbid,
        content: ContentId,
        hostname: &str,
        address: &str,
        port: u16,
        data_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dbid,
            content,
            role: SegmentRole::Mirror,
            preferred_role: SegmentRole::Mirror,
            mode: SegmentMode::NotInSync,
            status: SegmentStatus::Up,
            hostname: hostname.to_string(),
            address: address.to_string(),
            port,
            data_directory: data_directory.into(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == SegmentRole::Primary
    }

    pub fn is_preferred_primary(&self) -> bool {
        self.preferred_role == SegmentRole::Primary
    }

    pub fn is_mirror(&self) -> bool {
        self.role == SegmentRole::Mirror
    }

    pub fn is_up(&self) -> bool {
        self.status == SegmentStatus::Up
    }

    pub fn is_coordinator(&self) -> bool {
        self.content == COORDINATOR_CONTENT
    }

    /// Whether this segment serves user data (is not the coordinator).
    pub fn is_data_segment(&self) -> bool {
        self.content >= 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dbid {} (content {}, {} on {}:{})",
            self.dbid, self.content, self.role, self.address, self.port
        )
    }
}

/// The three build/recovery scenarios, made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildKind {
    /// Resynchronize a failed segment in its existing location.
    RecoverInPlace { failed: Segment, live: Segment },
    /// Replace a failed segment with a brand-new target segment. The target
    /// reuses the failed segment's dbid with updated location attributes.
    FailoverToNew {
        failed: Segment,
        live: Segment,
        target: Segment,
    },
    /// Attach a brand-new mirror to a primary that has none.
    AddNewMirror { live: Segment, new_mirror: Segment },
}

/// A planned or requested unit of work: build or recover one mirror.
///
/// Immutable once constructed; validated at construction so the orchestrator
/// never sees an internally inconsistent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorBuildRequest {
    kind: BuildKind,
    force_full: bool,
}

impl MirrorBuildRequest {
    /// Recover a failed segment in place.
    pub fn recover_in_place(failed: Segment, live: Segment, force_full: bool) -> Result<Self> {
        Self::check_live(&live)?;
        Self::check_counterpart(&failed, &live)?;
        Ok(Self {
            kind: BuildKind::RecoverInPlace { failed, live },
            force_full,
        })
    }

    /// Fail over a failed segment to a brand-new target location.
    pub fn failover_to_new(failed: Segment, live: Segment, target: Segment) -> Result<Self> {
        Self::check_live(&live)?;
        Self::check_counterpart(&failed, &live)?;
        Self::check_counterpart(&target, &live)?;
        if failed.dbid != target.dbid {
            return Err(MirrorError::Validation(format!(
                "failover target for content {} must reuse the failed segment's dbid \
                 (failed dbid {}, target dbid {})",
                live.content, failed.dbid, target.dbid
            )));
        }
        Ok(Self {
            kind: BuildKind::FailoverToNew {
                failed,
                live,
                target,
            },
            force_full: true,
        })
    }

    /// Attach a brand-new mirror to a primary.
    pub fn add_new_mirror(live: Segment, new_mirror: Segment) -> Result<Self> {
        Self::check_live(&live)?;
        Self::check_counterpart(&new_mirror, &live)?;
        Ok(Self {
            kind: BuildKind::AddNewMirror { live, new_mirror },
            force_full: true,
        })
    }

    fn check_live(live: &Segment) -> Result<()> {
        if !live.is_data_segment() {
            return Err(MirrorError::Validation(format!(
                "Segment to recover from for content {} is not a data segment",
                live.content
            )));
        }
        if !live.is_primary() {
            return Err(MirrorError::Validation(format!(
                "Segment to recover from for content {} is not a primary",
                live.content
            )));
        }
        if !live.is_up() {
            return Err(MirrorError::Validation(format!(
                "Primary segment is not up for content {}",
                live.content
            )));
        }
        Ok(())
    }

    fn check_counterpart(other: &Segment, live: &Segment) -> Result<()> {
        if other.content != live.content {
            return Err(MirrorError::Validation(format!(
                "The primary is not of the same content as the mirror. \
                 Primary content {}, mirror content {}",
                live.content, other.content
            )));
        }
        if other.dbid == live.dbid {
            return Err(MirrorError::Validation(format!(
                "For content {}, the dbid values are the same. \
                 A segment may not be recovered from itself",
                live.content
            )));
        }
        Ok(())
    }

    pub fn kind(&self) -> &BuildKind {
        &self.kind
    }

    /// The surviving/reference copy recovery takes place from.
    pub fn live_segment(&self) -> &Segment {
        match &self.kind {
            BuildKind::RecoverInPlace { live, .. }
            | BuildKind::FailoverToNew { live, .. }
            | BuildKind::AddNewMirror { live, .. } => live,
        }
    }

    /// The failed segment, when recovering rather than adding.
    pub fn failed_segment(&self) -> Option<&Segment> {
        match &self.kind {
            BuildKind::RecoverInPlace { failed, .. } | BuildKind::FailoverToNew { failed, .. } => {
                Some(failed)
            }
            BuildKind::AddNewMirror { .. } => None,
        }
    }

    /// The segment data is copied to: the failover target, the new mirror,
    /// or the failed segment itself when recovering in place.
    pub fn target_segment(&self) -> &Segment {
        match &self.kind {
            BuildKind::RecoverInPlace { failed, .. } => failed,
            BuildKind::FailoverToNew { target, .. } => target,
            BuildKind::AddNewMirror { new_mirror, .. } => new_mirror,
        }
    }

    /// Whether recovery must use full-copy semantics. Failing over to a new
    /// location and adding a fresh mirror always copy in full.
    pub fn is_full_synchronization(&self) -> bool {
        match &self.kind {
            BuildKind::RecoverInPlace { .. } => self.force_full,
            BuildKind::FailoverToNew { .. } | BuildKind::AddNewMirror { .. } => true,
        }
    }

    /// Whether this is an in-place recovery with forced full copy, whose
    /// abandoned on-disk state is cleaned up after the batch.
    pub fn is_forced_full_in_place(&self) -> bool {
        self.force_full && matches!(self.kind, BuildKind::RecoverInPlace { .. })
    }
}

/// Machine-readable classification of a per-segment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// A remote command errored outright.
    ExecutionFailed,
    /// The fault detector never observed the segment down within the bound.
    MarkdownTimeout,
    /// The resynchronization operation failed.
    ResyncFailed,
    /// The final segment start failed.
    StartFailed,
}

/// Per-segment outcome of a build batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub dbid: Dbid,
    pub success: bool,
    /// Human-readable reason; empty for successes.
    pub reason: String,
    pub fault_code: Option<FaultCode>,
}

impl BuildResult {
    pub fn ok(dbid: Dbid) -> Self {
        Self {
            dbid,
            success: true,
            reason: String::new(),
            fault_code: None,
        }
    }

    pub fn failed(dbid: Dbid, fault_code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            dbid,
            success: false,
            reason: reason.into(),
            fault_code: Some(fault_code),
        }
    }
}
