//! Planner configuration and the mirror-configuration file format.
//!
//! The exchange format is one pipe-delimited line per planned mirror:
//!
//! ```text
//! content|address|port|dataDirectory
//! ```
//!
//! Malformed lines are a fatal input error reported with line number and
//! filename, before any planning output is used.

use crate::error::{MirrorError, Result};
use crate::topology::ClusterTopology;
use crate::types::{ContentId, Segment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Lowest port a derived mirror port may use.
pub const MIN_MIRROR_PORT: u16 = 6432;
/// Highest port a derived mirror port may use.
pub const MAX_MIRROR_PORT: u16 = 61000;
/// Upper bound on the worker-pool parallelism degree.
pub const MAX_PARALLEL_DEGREE: usize = 64;

/// Placement strategy for new mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStrategy {
    /// Spread each host's mirrors across as many distinct hosts as possible.
    Spread,
    /// Mirror all of a host's primaries onto a single partner host.
    Grouped,
}

impl fmt::Display for MirrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorStrategy::Spread => write!(f, "spread"),
            MirrorStrategy::Grouped => write!(f, "grouped"),
        }
    }
}

impl FromStr for MirrorStrategy {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spread" => Ok(MirrorStrategy::Spread),
            "grouped" | "group" => Ok(MirrorStrategy::Grouped),
            other => Err(MirrorError::InvalidConfig {
                field: "strategy".to_string(),
                reason: format!("unknown strategy '{}', expected spread or grouped", other),
            }),
        }
    }
}

/// Options steering planning and the build orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOptions {
    /// Placement strategy.
    pub strategy: MirrorStrategy,
    /// Offset added to a destination host's primary port base to derive
    /// mirror ports. May be negative.
    pub port_offset: i32,
    /// Maximum concurrent remote commands per build phase.
    pub parallel_degree: usize,
    /// Maximum polls while waiting for the fault detector to mark stopped
    /// segments down.
    pub max_markdown_retries: usize,
    /// Sleep between fault-detector polls.
    pub markdown_poll_interval: Duration,
    /// Redraw progress lines in place rather than appending.
    pub interactive_progress: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            strategy: MirrorStrategy::Grouped,
            port_offset: 1000,
            parallel_degree: 16,
            max_markdown_retries: 360,
            markdown_poll_interval: Duration::from_secs(5),
            interactive_progress: false,
        }
    }
}

impl PlannerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.parallel_degree < 1 || self.parallel_degree > MAX_PARALLEL_DEGREE {
            return Err(MirrorError::InvalidConfig {
                field: "parallel_degree".to_string(),
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_PARALLEL_DEGREE, self.parallel_degree
                ),
            });
        }
        if self.max_markdown_retries == 0 {
            return Err(MirrorError::InvalidConfig {
                field: "max_markdown_retries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Check that the port offset keeps every derived mirror port in the
    /// allowed range, given the ports currently in use.
    pub fn check_port_offset(&self, topology: &ClusterTopology) -> Result<()> {
        let ports = topology.segments().iter().map(|s| i64::from(s.port));
        let (Some(min_port), Some(max_port)) = (ports.clone().min(), ports.max()) else {
            return Ok(());
        };

        let offset = i64::from(self.port_offset);
        // The offset is applied on top of per-host mirror counts, so probe
        // the extremes the derivation can reach.
        let (low, high) = if offset < 0 {
            (min_port + 3 * offset, max_port + offset)
        } else {
            (min_port + offset, max_port + 3 * offset)
        };

        for port in [low, high] {
            if port < i64::from(MIN_MIRROR_PORT) || port > i64::from(MAX_MIRROR_PORT) {
                return Err(MirrorError::PortOutOfRange {
                    port,
                    min: MIN_MIRROR_PORT,
                    max: MAX_MIRROR_PORT,
                });
            }
        }
        Ok(())
    }
}

/// One parsed line of a mirror-configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfigRow {
    pub content: ContentId,
    pub address: String,
    pub port: u16,
    pub data_directory: PathBuf,
    pub line: usize,
}

fn parse_line(file: &str, line_number: usize, line: &str) -> Result<MirrorConfigRow> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 4 {
        return Err(MirrorError::ConfigFile {
            file: file.to_string(),
            line: line_number,
            reason: format!("expected 4 parts, obtained {}", parts.len()),
        });
    }

    let content: ContentId = parts[0].trim().parse().map_err(|_| MirrorError::ConfigFile {
        file: file.to_string(),
        line: line_number,
        reason: format!("invalid content id '{}'", parts[0]),
    })?;
    let address = parts[1].trim();
    if address.is_empty() {
        return Err(MirrorError::ConfigFile {
            file: file.to_string(),
            line: line_number,
            reason: "address must not be empty".to_string(),
        });
    }
    let port: u16 = parts[2].trim().parse().map_err(|_| MirrorError::ConfigFile {
        file: file.to_string(),
        line: line_number,
        reason: format!("invalid port '{}'", parts[2]),
    })?;
    let data_directory = parts[3].trim();
    if !data_directory.starts_with('/') {
        return Err(MirrorError::ConfigFile {
            file: file.to_string(),
            line: line_number,
            reason: format!("data directory '{}' must be an absolute path", data_directory),
        });
    }

    Ok(MirrorConfigRow {
        content,
        address: address.to_string(),
        port,
        data_directory: PathBuf::from(data_directory),
        line: line_number,
    })
}

/// Parse a mirror-configuration file. Empty lines are skipped; malformed
/// lines are fatal.
pub fn parse_mirror_config(path: &Path) -> Result<Vec<MirrorConfigRow>> {
    let file = path.display().to_string();
    let content = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rows.push(parse_line(&file, index + 1, line)?);
    }
    Ok(rows)
}

/// Format one plan line for a computed mirror.
pub fn format_plan_line(mirror: &Segment) -> String {
    format!(
        "{}|{}|{}|{}",
        mirror.content,
        mirror.address,
        mirror.port,
        mirror.data_directory.display()
    )
}

/// Write a computed plan in the pipe-delimited exchange format.
pub fn write_mirror_config(path: &Path, mirrors: &[&Segment]) -> Result<()> {
    let mut lines: Vec<String> = mirrors.iter().map(|m| format_plan_line(m)).collect();
    lines.push(String::new());
    std::fs::write(path, lines.join("\n"))?;
    Ok(())
}

/// Read a data-directory list file: one absolute path per line, exactly
/// `expected` entries (the maximum number of primaries on any host).
pub fn read_data_directories(path: &Path, expected: usize) -> Result<Vec<PathBuf>> {
    let file = path.display().to_string();
    let content = std::fs::read_to_string(path)?;
    let mut dirs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if dirs.len() == expected {
            return Err(MirrorError::ConfigFile {
                file,
                line: index + 1,
                reason: format!("number of data directories must equal {} but more were read", expected),
            });
        }
        if !line.starts_with('/') {
            return Err(MirrorError::ConfigFile {
                file,
                line: index + 1,
                reason: format!("data directory '{}' must be an absolute path", line),
            });
        }
        dirs.push(PathBuf::from(line));
    }
    if dirs.len() < expected {
        return Err(MirrorError::Validation(format!(
            "Number of data directories must equal {} but {} were read from {}",
            expected,
            dirs.len(),
            file
        )));
    }
    Ok(dirs)
}
