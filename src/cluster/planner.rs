//! Conflict-free mirror placement across hosts.
//!
//! [`MirrorPlanner`] is pure planning: it computes where new mirrors should
//! live (host, address, port, data directory) against a working copy of the
//! topology and never performs I/O against hosts. Hosts are always visited in
//! lexicographic order so a plan is reproducible across runs.
//!
//! Two strategies are offered. Spread mirroring walks the host list from each
//! origin host's position so mirrors from one host land on as many distinct
//! hosts as possible. Group mirroring pairs each host with the next host in
//! the sorted cyclic order, concentrating the failure domain in exchange for
//! a simpler mental model and denser placement.

use crate::config::MirrorConfigRow;
use crate::error::{MirrorError, Result};
use crate::topology::ClusterTopology;
use crate::types::{Dbid, MirrorBuildRequest, Segment, SegmentMode};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// The outcome of one planning session.
#[derive(Debug, Clone)]
pub struct MirrorPlan {
    /// One build request per planned mirror, in placement order.
    pub requests: Vec<MirrorBuildRequest>,
    /// The working topology with the planned mirrors appended and the
    /// affected primaries flipped to not-in-sync.
    pub topology: ClusterTopology,
    /// Non-fatal findings surfaced to the caller, such as a non-standard
    /// cluster shape.
    pub warnings: Vec<String>,
}

impl MirrorPlan {
    /// The planned mirror segments, in placement order.
    pub fn mirrors(&self) -> Vec<&Segment> {
        self.requests.iter().map(|r| r.target_segment()).collect()
    }
}

/// Computes mirror placements for an existing topology.
///
/// Construct one planner per planning session and consume it with
/// [`spread_mirrors`](Self::spread_mirrors),
/// [`group_mirrors`](Self::group_mirrors), or
/// [`plan_from_rows`](Self::plan_from_rows); internal per-host counters make
/// a planner single-use.
pub struct MirrorPlanner {
    topology: ClusterTopology,
    data_dirs: Vec<PathBuf>,
    port_offset: i32,
    next_dbid: Dbid,
    min_primary_port: u16,
    /// Primaries per host, hosts lexicographically sorted, segments sorted
    /// by port within a host.
    primaries_by_host: BTreeMap<String, Vec<Segment>>,
    /// Mirrors placed so far on each destination host.
    mirrors_added: BTreeMap<String, usize>,
    /// Primaries on each origin host that have been attached to a mirror.
    primaries_attached: BTreeMap<String, usize>,
    /// Lowest primary port per host; mirror ports are derived from it.
    port_base: BTreeMap<String, u16>,
    standard: bool,
    warnings: Vec<String>,
}

impl MirrorPlanner {
    /// Create a planner over a working copy of the topology.
    ///
    /// `data_dirs` is consumed round-robin per destination host and must be
    /// sized to the maximum number of primaries on any host.
    pub fn new(
        topology: ClusterTopology,
        data_dirs: Vec<PathBuf>,
        port_offset: i32,
    ) -> Result<Self> {
        if topology.has_mirrors() {
            return Err(MirrorError::Validation(
                "Physical mirroring cannot be added. The cluster is already configured \
                 with mirrors."
                    .to_string(),
            ));
        }

        let primaries: Vec<Segment> = topology.primaries().into_iter().cloned().collect();
        if primaries.is_empty() {
            return Err(MirrorError::PlacementFailed(
                "cluster has no data-segment primaries to mirror".to_string(),
            ));
        }
        let min_primary_port = primaries
            .iter()
            .map(|s| s.port)
            .min()
            .unwrap_or(0);

        let mut primaries_by_host: BTreeMap<String, Vec<Segment>> = BTreeMap::new();
        for seg in primaries {
            primaries_by_host
                .entry(seg.hostname.clone())
                .or_default()
                .push(seg);
        }
        let mut mirrors_added = BTreeMap::new();
        let mut primaries_attached = BTreeMap::new();
        let mut port_base = BTreeMap::new();
        for (host, segs) in primaries_by_host.iter_mut() {
            segs.sort_by_key(|s| s.port);
            port_base.insert(host.clone(), segs[0].port);
            mirrors_added.insert(host.clone(), 0);
            primaries_attached.insert(host.clone(), 0);
        }

        let (standard, message) = topology.is_standard_array();
        let mut warnings = Vec::new();
        if !standard {
            warn!(reason = %message, "the current system appears to be non-standard");
            warnings.push(format!(
                "The current system appears to be non-standard ({}); the new mirrors \
                 may not be symmetrically distributed. Consider supplying an explicit \
                 mirror configuration file.",
                message
            ));
        }

        let next_dbid = topology.max_dbid() + 1;
        Ok(Self {
            topology,
            data_dirs,
            port_offset,
            next_dbid,
            min_primary_port,
            primaries_by_host,
            mirrors_added,
            primaries_attached,
            port_base,
            standard,
            warnings,
        })
    }

    /// Plan one mirror for `primary_dbid` at an explicit location.
    ///
    /// Appends the new mirror to the working topology, flips the primary's
    /// mode to not-in-sync (a brand-new mirror starts unsynchronized), and
    /// advances the dbid counter and host occupancy so subsequent calls see
    /// the updated state.
    pub fn add_mirror(
        &mut self,
        primary_dbid: Dbid,
        target_host: &str,
        address: &str,
        port: u16,
        data_directory: impl Into<PathBuf>,
    ) -> Result<MirrorBuildRequest> {
        let primary = self
            .topology
            .get(primary_dbid)
            .cloned()
            .ok_or_else(|| {
                MirrorError::Validation(format!("No segment with dbid {} in topology", primary_dbid))
            })?;
        if !primary.is_preferred_primary() || !primary.is_data_segment() {
            return Err(MirrorError::Validation(format!(
                "Segment {} is not a data-segment primary",
                primary
            )));
        }

        // A target host without primaries (an explicit placement onto a
        // spare host) starts from the cluster-wide minimum primary port.
        self.mirrors_added.entry(target_host.to_string()).or_insert(0);
        self.primaries_attached
            .entry(target_host.to_string())
            .or_insert(0);
        self.port_base
            .entry(target_host.to_string())
            .or_insert(self.min_primary_port);

        let mirror = Segment::new_mirror(
            self.next_dbid,
            primary.content,
            target_host,
            address,
            port,
            data_directory,
        );
        self.topology.add_segment_db(mirror.clone())?;
        self.topology
            .update_segment(primary.dbid, None, Some(SegmentMode::NotInSync), None)?;

        let mut live = primary.clone();
        live.mode = SegmentMode::NotInSync;
        let request = MirrorBuildRequest::add_new_mirror(live, mirror)?;

        *self
            .primaries_attached
            .get_mut(&primary.hostname)
            .ok_or_else(|| MirrorError::Internal("unknown origin host".to_string()))? += 1;
        *self
            .mirrors_added
            .get_mut(target_host)
            .ok_or_else(|| MirrorError::Internal("unknown target host".to_string()))? += 1;
        self.next_dbid += 1;
        Ok(request)
    }

    /// Plan a mirror for `primary` on `target_host`, deriving address, port,
    /// and data directory from the hosts' existing primaries.
    fn add_mirror_for_target_host(
        &mut self,
        primary: &Segment,
        target_host: &str,
    ) -> Result<MirrorBuildRequest> {
        let mirror_index = *self
            .mirrors_added
            .get(target_host)
            .ok_or_else(|| MirrorError::Internal("unknown target host".to_string()))?;

        // Port: destination host's lowest primary port, advanced by the
        // number of mirrors already placed there, plus the offset.
        let base_port = i64::from(
            *self
                .port_base
                .get(target_host)
                .ok_or_else(|| MirrorError::Internal("unknown target host".to_string()))?,
        ) + mirror_index as i64;
        let port = base_port + i64::from(self.port_offset);
        let port = u16::try_from(port).map_err(|_| MirrorError::PortOutOfRange {
            port,
            min: crate::config::MIN_MIRROR_PORT,
            max: crate::config::MAX_MIRROR_PORT,
        })?;

        if mirror_index >= self.data_dirs.len() {
            return Err(MirrorError::InsufficientDirectories {
                host: target_host.to_string(),
            });
        }
        let data_directory = self.data_dirs[mirror_index].clone();

        let address = self.pick_address(primary, target_host, mirror_index)?;
        self.add_mirror(primary.dbid, target_host, &address, port, data_directory)
    }

    /// Cycle through the destination host's distinct primary addresses so
    /// mirrors don't concentrate on one interface. On a standard array the
    /// mirror lands one address past the primary's own position, keeping the
    /// pair on different subnets.
    fn pick_address(
        &self,
        primary: &Segment,
        target_host: &str,
        mirror_index: usize,
    ) -> Result<String> {
        let on_target = self
            .primaries_by_host
            .get(target_host)
            .ok_or_else(|| MirrorError::Internal("unknown target host".to_string()))?;

        if !self.standard {
            return Ok(on_target[mirror_index % on_target.len()].address.clone());
        }

        let on_origin = self
            .primaries_by_host
            .get(&primary.hostname)
            .ok_or_else(|| MirrorError::Internal("unknown origin host".to_string()))?;
        let origin_addresses = distinct_sorted_addresses(on_origin);
        let target_addresses = distinct_sorted_addresses(on_target);

        let index = origin_addresses
            .iter()
            .position(|a| *a == primary.address)
            .unwrap_or(origin_addresses.len().saturating_sub(1));
        let index = (index + 1) % target_addresses.len();
        Ok(target_addresses[index].clone())
    }

    /// Spread mirroring: for each host in lexicographic order, walk the host
    /// list from the host's own position to place every primary's mirror on
    /// a different destination, advancing the walk by one per placement.
    pub fn spread_mirrors(mut self) -> Result<MirrorPlan> {
        let hosts: Vec<String> = self.primaries_by_host.keys().cloned().collect();
        if hosts.len() < 2 {
            return Err(MirrorError::PlacementFailed(
                "at least two hosts with primaries are required to place mirrors".to_string(),
            ));
        }
        let mut requests = Vec::new();

        for (host_index, host) in hosts.iter().enumerate() {
            let primaries = self.primaries_by_host[host].clone();

            // host_offset puts mirrors on host+1, host+2, host+3, ...
            let mut host_offset = 1usize;
            for primary in &primaries {
                let mut target_index = (host_index + host_offset) % hosts.len();
                if target_index == host_index {
                    host_offset += 1;
                    target_index = (host_index + host_offset) % hosts.len();
                }
                requests.push(self.add_mirror_for_target_host(primary, &hosts[target_index])?);
                host_offset += 1;
            }
        }
        Ok(self.finish(requests))
    }

    /// Group mirroring: every primary on a host is mirrored onto the next
    /// host in the sorted cyclic order.
    pub fn group_mirrors(mut self) -> Result<MirrorPlan> {
        let hosts: Vec<String> = self.primaries_by_host.keys().cloned().collect();
        if hosts.len() < 2 {
            return Err(MirrorError::PlacementFailed(
                "at least two hosts with primaries are required to place mirrors".to_string(),
            ));
        }
        let mut requests = Vec::new();

        for (host_index, host) in hosts.iter().enumerate() {
            let primaries = self.primaries_by_host[host].clone();
            let target_host = hosts[(host_index + 1) % hosts.len()].clone();
            for primary in &primaries {
                requests.push(self.add_mirror_for_target_host(primary, &target_host)?);
            }
        }
        Ok(self.finish(requests))
    }

    /// Build a plan from explicit configuration rows, resolving each content
    /// id against the current primaries. Exactly one mirror per primary must
    /// be supplied.
    pub fn plan_from_rows(mut self, rows: &[MirrorConfigRow]) -> Result<MirrorPlan> {
        let primaries_by_content: BTreeMap<i32, Dbid> = self
            .topology
            .primaries()
            .iter()
            .map(|s| (s.content, s.dbid))
            .collect();

        let mut requests = Vec::new();
        for row in rows {
            let primary_dbid = *primaries_by_content.get(&row.content).ok_or_else(|| {
                MirrorError::Validation(format!(
                    "Invalid content {} specified in input file (line {})",
                    row.content, row.line
                ))
            })?;
            // The exchange format carries no hostname; the address stands in.
            requests.push(self.add_mirror(
                primary_dbid,
                &row.address,
                &row.address,
                row.port,
                row.data_directory.clone(),
            )?);
        }

        if requests.len() != primaries_by_content.len() {
            return Err(MirrorError::Validation(format!(
                "Wrong number of mirrors specified (specified {} mirror(s) for {} primary(ies))",
                requests.len(),
                primaries_by_content.len()
            )));
        }
        Ok(self.finish(requests))
    }

    /// Close the planning session, handing the composed requests and the
    /// mutated working topology back to the caller.
    pub fn finish(self, requests: Vec<MirrorBuildRequest>) -> MirrorPlan {
        MirrorPlan {
            requests,
            topology: self.topology,
            warnings: self.warnings,
        }
    }
}

fn distinct_sorted_addresses(segments: &[Segment]) -> Vec<String> {
    let mut addresses: Vec<String> = segments.iter().map(|s| s.address.clone()).collect();
    addresses.sort_unstable();
    addresses.dedup();
    addresses
}
