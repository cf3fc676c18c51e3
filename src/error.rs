//! Error types for mirrorgrid operations.
//!
//! All fallible operations return [`Result`]. Errors fall into two broad
//! groups: validation errors, which are raised before any remote mutation
//! takes place, and execution errors, which describe failures of individual
//! remote commands or collaborator calls.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mirrorgrid operations.
#[derive(Error, Debug)]
pub enum MirrorError {
    // Validation errors: raised before any mutation, fail fast.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("line {line} of file {file}: {reason}")]
    ConfigFile {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("More mirrors targeted to host {host} than there are mirror data directories")]
    InsufficientDirectories { host: String },

    #[error("Segment dbids {dbid_a} and {dbid_b} on host {host} cannot have the same port {port}")]
    PortConflict {
        host: String,
        port: u16,
        dbid_a: i32,
        dbid_b: i32,
    },

    #[error("Segment dbids {dbid_a} and {dbid_b} on host {host} cannot have the same data directory '{path}'")]
    DirectoryConflict {
        host: String,
        path: PathBuf,
        dbid_a: i32,
        dbid_b: i32,
    },

    #[error("Port offset produces ports outside of the valid range [{min}, {max}]: {port}")]
    PortOutOfRange { port: i64, min: u16, max: u16 },

    #[error("Placement failed: {0}")]
    PlacementFailed(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Execution errors: per-command or per-collaborator failures.
    #[error("Command '{name}' failed on host {host} with exit status {exit_status}: {stderr}")]
    CommandFailed {
        name: String,
        host: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("{failed} of {total} commands failed: {detail}")]
    ExecutionErrors {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("Worker pool was halted before the command ran")]
    Halted,

    #[error("Remote execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Whether this error was raised by up-front validation, before any
    /// remote mutation. The CLI maps these to a distinct exit code.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MirrorError::Validation(_)
                | MirrorError::ConfigFile { .. }
                | MirrorError::InsufficientDirectories { .. }
                | MirrorError::PortConflict { .. }
                | MirrorError::DirectoryConflict { .. }
                | MirrorError::PortOutOfRange { .. }
                | MirrorError::PlacementFailed(_)
                | MirrorError::InvalidConfig { .. }
        )
    }
}

/// Result type alias for mirrorgrid operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
