//! Topology-aware mirror placement and recovery for sharded clusters.
//!
//! A cluster is a set of content-addressed primary segments spread over a
//! fleet of hosts. This crate plans where each primary's mirror should live
//! (spread or grouped placement, or an operator-supplied layout file) and
//! then orchestrates building those mirrors in parallel: stopping failed
//! processes, waiting for the fault detector to agree, resynchronizing data
//! from the live counterparts, committing the new topology in one atomic
//! configuration update, and starting everything back up.
//!
//! The crate owns planning and orchestration only. Transport, fault
//! detection, the data-copy procedure, and configuration persistence are
//! injected through the traits in [`remote`].

pub mod cluster;
pub mod config;
pub mod error;
pub mod remote;
pub mod topology;
pub mod types;

pub use cluster::{
    BatchResult, BuildOrchestrator, BuildPhase, BuildServices, MirrorPlan, MirrorPlanner,
    WorkerPool,
};
pub use config::{MirrorStrategy, PlannerOptions};
pub use error::{MirrorError, Result};
pub use topology::ClusterTopology;
pub use types::{
    BuildKind, BuildResult, ContentId, Dbid, FaultCode, MirrorBuildRequest, Segment, SegmentMode,
    SegmentRole, SegmentStatus,
};
