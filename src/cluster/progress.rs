//! Live progress board for worker-pool phases.
//!
//! While commands are outstanding the orchestrator polls the pool's partial
//! results and prints one line per (host, dbid). In interactive mode the
//! previously printed block is overwritten in place on each redraw, producing
//! a live status board; otherwise lines are appended.

use crate::cluster::worker::WorkerPool;
use crate::error::Result;
use crate::types::Dbid;
use std::io::Write;
use std::time::Duration;

/// One tracked row of the board.
#[derive(Debug, Clone)]
pub struct ProgressRow {
    pub host: String,
    pub dbid: Dbid,
}

/// Renders pool progress until every command has finished.
pub struct ProgressReporter<W: Write> {
    rows: Vec<ProgressRow>,
    inplace: bool,
    interval: Duration,
    out: W,
    written: bool,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(rows: Vec<ProgressRow>, inplace: bool, interval: Duration, out: W) -> Self {
        Self {
            rows,
            inplace,
            interval,
            out,
            written: false,
        }
    }

    /// Drive the pool to completion, redrawing the board between polls, and
    /// finish with one final draw so every line shows the terminal status.
    pub async fn join_and_show(&mut self, pool: &mut WorkerPool) -> Result<()> {
        while !pool.join_timeout(self.interval).await {
            self.draw(pool)?;
        }
        self.draw(pool)?;
        Ok(())
    }

    fn draw(&mut self, pool: &WorkerPool) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        if self.written && self.inplace {
            // Move the cursor back up over the previous block.
            write!(self.out, "\x1B[{}A", self.rows.len())?;
        }

        let completed = pool.completed_items();
        let mut output = String::new();
        for row in &self.rows {
            let status = completed
                .iter()
                .find(|c| c.meta.host == row.host && c.meta.dbid == Some(row.dbid))
                .map(|c| c.last_output_line())
                .unwrap_or_else(|| "in progress".to_string());
            output.push_str(&format!("{} (dbid {}): {}", row.host, row.dbid, status));
            if self.inplace {
                output.push_str("\x1B[K");
            }
            output.push('\n');
        }

        self.out.write_all(output.as_bytes())?;
        self.out.flush()?;
        self.written = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CommandResult, RemoteCommandExecutor};
    use crate::cluster::worker::RemoteCommand;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoExecutor;

    #[async_trait]
    impl RemoteCommandExecutor for EchoExecutor {
        async fn run(&self, _name: &str, cmd: &str, _host: &str) -> Result<CommandResult> {
            Ok(CommandResult {
                exit_status: 0,
                stdout: format!("ran {}", cmd),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_appending_board_shows_final_status() {
        let mut pool = WorkerPool::new(2, Arc::new(EchoExecutor)).expect("pool");
        pool.add_command(RemoteCommand::new("copy", "resync-0", "sdw1").with_dbid(6));
        pool.add_command(RemoteCommand::new("copy", "resync-1", "sdw2").with_dbid(7));

        let rows = vec![
            ProgressRow {
                host: "sdw1".to_string(),
                dbid: 6,
            },
            ProgressRow {
                host: "sdw2".to_string(),
                dbid: 7,
            },
        ];
        let mut buffer = Vec::new();
        let mut reporter =
            ProgressReporter::new(rows, false, Duration::from_millis(5), &mut buffer);
        reporter.join_and_show(&mut pool).await.expect("progress");

        let rendered = String::from_utf8(buffer).expect("utf8");
        assert!(rendered.contains("sdw1 (dbid 6): ran resync-0"));
        assert!(rendered.contains("sdw2 (dbid 7): ran resync-1"));
        assert!(!rendered.contains("\x1B["));
    }

    #[tokio::test]
    async fn test_inplace_board_rewrites_previous_block() {
        let mut pool = WorkerPool::new(1, Arc::new(EchoExecutor)).expect("pool");
        pool.add_command(RemoteCommand::new("copy", "resync-0", "sdw1").with_dbid(6));

        let rows = vec![ProgressRow {
            host: "sdw1".to_string(),
            dbid: 6,
        }];
        let mut buffer = Vec::new();
        let mut reporter = ProgressReporter::new(rows, true, Duration::from_millis(5), &mut buffer);
        reporter.join_and_show(&mut pool).await.expect("progress");

        let rendered = String::from_utf8(buffer).expect("utf8");
        // Every line is erase-terminated; redraws move the cursor back up.
        assert!(rendered.contains("\x1B[K"));
    }
}
