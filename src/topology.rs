//! The authoritative in-memory cluster topology.
//!
//! [`ClusterTopology`] holds the ordered list of all segments plus derived
//! lookups by host and by content id. The planner mutates a working copy of
//! it single-threaded during planning; the orchestrator only touches it at
//! its single persist synchronization point, never from worker tasks.

use crate::error::{MirrorError, Result};
use crate::types::{ContentId, Dbid, Segment, SegmentMode, SegmentRole, SegmentStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Ordered collection of all segments in the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    segments: Vec<Segment>,
}

impl ClusterTopology {
    /// Build a topology from a list of segments. Dbids must be unique and
    /// positive.
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        let mut seen: HashMap<Dbid, ()> = HashMap::with_capacity(segments.len());
        for seg in &segments {
            if seg.dbid <= 0 {
                return Err(MirrorError::Validation(format!(
                    "Segment dbid must be positive, got {}",
                    seg.dbid
                )));
            }
            if seen.insert(seg.dbid, ()).is_some() {
                return Err(MirrorError::Validation(format!(
                    "Duplicate segment dbid {}",
                    seg.dbid
                )));
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, dbid: Dbid) -> Option<&Segment> {
        self.segments.iter().find(|s| s.dbid == dbid)
    }

    pub fn get_mut(&mut self, dbid: Dbid) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.dbid == dbid)
    }

    /// Append a new segment. The dbid must not already be present and the
    /// placement must not conflict with an existing segment on the same host.
    pub fn add_segment_db(&mut self, segment: Segment) -> Result<()> {
        if self.get(segment.dbid).is_some() {
            return Err(MirrorError::Validation(format!(
                "Segment dbid {} already present in topology",
                segment.dbid
            )));
        }
        self.segments.push(segment);
        Ok(())
    }

    /// Replace the segment holding `dbid` with `segment` (same dbid, updated
    /// location attributes), used when failing over to a new target.
    pub fn replace_segment(&mut self, segment: Segment) -> Result<()> {
        let slot = self
            .segments
            .iter_mut()
            .find(|s| s.dbid == segment.dbid)
            .ok_or_else(|| {
                MirrorError::Validation(format!("No segment with dbid {} to replace", segment.dbid))
            })?;
        *slot = segment;
        Ok(())
    }

    /// Highest dbid currently assigned; new dbids are allocated above it.
    pub fn max_dbid(&self) -> Dbid {
        self.segments.iter().map(|s| s.dbid).max().unwrap_or(0)
    }

    /// Data-serving segments whose preferred role is primary, in topology
    /// order. The coordinator is excluded.
    pub fn primaries(&self) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| s.is_data_segment() && s.is_preferred_primary())
            .collect()
    }

    /// Whether the topology already carries mirrors for any data segment.
    pub fn has_mirrors(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.is_data_segment() && s.preferred_role == SegmentRole::Mirror)
    }

    /// Group segments by hostname into a deterministic, lexicographically
    /// sorted map. Placement order must be reproducible across runs, so the
    /// grouping never depends on hash iteration order.
    pub fn group_by_host<'a>(segments: &[&'a Segment]) -> BTreeMap<String, Vec<&'a Segment>> {
        let mut by_host: BTreeMap<String, Vec<&Segment>> = BTreeMap::new();
        for seg in segments {
            by_host.entry(seg.hostname.clone()).or_default().push(seg);
        }
        by_host
    }

    /// Group segments by content id.
    pub fn group_by_content<'a>(segments: &[&'a Segment]) -> BTreeMap<ContentId, Vec<&'a Segment>> {
        let mut by_content: BTreeMap<ContentId, Vec<&Segment>> = BTreeMap::new();
        for seg in segments {
            by_content.entry(seg.content).or_default().push(seg);
        }
        by_content
    }

    /// Whether the cluster is a standard symmetric array: every host carries
    /// the same number of primaries over the same number of distinct
    /// addresses. Returns a description of the asymmetry otherwise.
    pub fn is_standard_array(&self) -> (bool, String) {
        let primaries = self.primaries();
        let by_host = Self::group_by_host(&primaries);
        if by_host.is_empty() {
            return (false, "cluster has no data-segment primaries".to_string());
        }

        let mut counts: Vec<(String, usize, usize)> = Vec::with_capacity(by_host.len());
        for (host, segs) in &by_host {
            let mut addresses: Vec<&str> = segs.iter().map(|s| s.address.as_str()).collect();
            addresses.sort_unstable();
            addresses.dedup();
            counts.push((host.clone(), segs.len(), addresses.len()));
        }

        let (_, first_primaries, first_addresses) = counts[0].clone();
        for (host, primaries, addresses) in &counts[1..] {
            if *primaries != first_primaries || *addresses != first_addresses {
                return (
                    false,
                    format!(
                        "host {} carries {} primaries on {} addresses, \
                         but host {} carries {} primaries on {} addresses",
                        host, primaries, addresses, counts[0].0, first_primaries, first_addresses
                    ),
                );
            }
        }
        (true, String::new())
    }

    /// Invariant check: no two segments on the same host may share a port or
    /// a data directory. Must pass before any plan is committed.
    pub fn check_port_and_directory_conflicts(&self) -> Result<()> {
        let all: Vec<&Segment> = self.segments.iter().collect();
        for (host, segs) in Self::group_by_host(&all) {
            let mut used_ports: HashMap<u16, Dbid> = HashMap::new();
            let mut used_dirs: HashMap<&PathBuf, Dbid> = HashMap::new();
            for seg in segs {
                if let Some(&other) = used_ports.get(&seg.port) {
                    return Err(MirrorError::PortConflict {
                        host,
                        port: seg.port,
                        dbid_a: other,
                        dbid_b: seg.dbid,
                    });
                }
                used_ports.insert(seg.port, seg.dbid);

                if let Some(&other) = used_dirs.get(&seg.data_directory) {
                    return Err(MirrorError::DirectoryConflict {
                        host,
                        path: seg.data_directory.clone(),
                        dbid_a: other,
                        dbid_b: seg.dbid,
                    });
                }
                used_dirs.insert(&seg.data_directory, seg.dbid);
            }
        }
        Ok(())
    }

    /// Apply a role/mode/status update to the segment holding `dbid`.
    pub fn update_segment(
        &mut self,
        dbid: Dbid,
        role: Option<SegmentRole>,
        mode: Option<SegmentMode>,
        status: Option<SegmentStatus>,
    ) -> Result<()> {
        let seg = self.get_mut(dbid).ok_or_else(|| {
            MirrorError::Validation(format!("No segment with dbid {} in topology", dbid))
        })?;
        if let Some(role) = role {
            seg.role = role;
        }
        if let Some(mode) = mode {
            seg.mode = mode;
        }
        if let Some(status) = status {
            seg.status = status;
        }
        Ok(())
    }
}
