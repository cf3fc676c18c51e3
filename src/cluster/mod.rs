//! Mirror placement planning and parallel build orchestration.
//!
//! The planner decides where each mirror lives; the builder drives the
//! fleet through stop, resynchronize, persist, and start phases using a
//! bounded worker pool.

pub mod builder;
pub mod planner;
pub mod progress;
pub mod worker;

pub use builder::{BatchResult, BuildOrchestrator, BuildPhase, BuildServices};
pub use planner::{MirrorPlan, MirrorPlanner};
pub use progress::{ProgressReporter, ProgressRow};
pub use worker::{CommandMeta, CommandOutcome, CompletedCommand, RemoteCommand, WorkerPool};
