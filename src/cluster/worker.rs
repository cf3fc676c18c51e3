//! Bounded-concurrency worker pool for remote per-host commands.
//!
//! The pool is a structured task group: commands are spawned onto a
//! [`tokio::task::JoinSet`] behind a semaphore bounding the degree of
//! parallelism, a watch channel carries best-effort cancellation, and every
//! command's individual result is retained so callers can inspect partial
//! failures after [`WorkerPool::check_results`] raises the aggregate.
//!
//! No ordering is guaranteed between commands; callers needing per-host
//! serialization submit at most one in-flight command per host.

use crate::error::{MirrorError, Result};
use crate::remote::{CommandResult, RemoteCommandExecutor};
use crate::types::Dbid;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Identity of a pool work item, used for reporting.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    /// Short human-readable command label.
    pub name: String,
    /// Host the work targets.
    pub host: String,
    /// Segment the work belongs to, when per-segment.
    pub dbid: Option<Dbid>,
}

/// A shell command to run on a remote host.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    pub meta: CommandMeta,
    pub cmd: String,
}

impl RemoteCommand {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            meta: CommandMeta {
                name: name.into(),
                host: host.into(),
                dbid: None,
            },
            cmd: cmd.into(),
        }
    }

    pub fn with_dbid(mut self, dbid: Dbid) -> Self {
        self.meta.dbid = Some(dbid);
        self
    }
}

/// How a pool work item ended.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The command ran to completion; inspect the exit status.
    Completed(CommandResult),
    /// The command could not be executed at all.
    Failed(String),
    /// The pool was halted before or while the command ran.
    Halted,
}

/// One finished work item with its captured result.
#[derive(Debug, Clone)]
pub struct CompletedCommand {
    pub meta: CommandMeta,
    pub outcome: CommandOutcome,
}

impl CompletedCommand {
    pub fn was_successful(&self) -> bool {
        matches!(&self.outcome, CommandOutcome::Completed(r) if r.was_successful())
    }

    /// Human-readable failure description, or `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.outcome {
            CommandOutcome::Completed(r) if r.was_successful() => None,
            CommandOutcome::Completed(r) => {
                let detail = if r.stderr.trim().is_empty() {
                    r.stdout.trim()
                } else {
                    r.stderr.trim()
                };
                Some(format!("exit status {}: {}", r.exit_status, detail))
            }
            CommandOutcome::Failed(reason) => Some(reason.clone()),
            CommandOutcome::Halted => Some(MirrorError::Halted.to_string()),
        }
    }

    /// Latest captured output line, for the progress board.
    pub fn last_output_line(&self) -> String {
        match &self.outcome {
            CommandOutcome::Completed(r) => {
                let source = if r.stdout.trim().is_empty() {
                    &r.stderr
                } else {
                    &r.stdout
                };
                source.lines().last().unwrap_or("").trim().to_string()
            }
            CommandOutcome::Failed(reason) => reason.clone(),
            CommandOutcome::Halted => "halted".to_string(),
        }
    }
}

/// Bounded-concurrency task runner executing commands against a
/// [`RemoteCommandExecutor`].
pub struct WorkerPool {
    executor: Arc<dyn RemoteCommandExecutor>,
    semaphore: Arc<Semaphore>,
    halt_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    completed: Arc<Mutex<Vec<CompletedCommand>>>,
    assigned: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_workers` commands concurrently.
    pub fn new(max_workers: usize, executor: Arc<dyn RemoteCommandExecutor>) -> Result<Self> {
        if max_workers == 0 {
            return Err(MirrorError::InvalidConfig {
                field: "max_workers".to_string(),
                reason: "worker pool requires at least one worker".to_string(),
            });
        }
        let (halt_tx, _) = watch::channel(false);
        Ok(Self {
            executor,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            halt_tx,
            tasks: JoinSet::new(),
            completed: Arc::new(Mutex::new(Vec::new())),
            assigned: 0,
        })
    }

    /// Enqueue a remote shell command.
    pub fn add_command(&mut self, command: RemoteCommand) {
        let executor = Arc::clone(&self.executor);
        let RemoteCommand { meta, cmd } = command;
        debug!(name = %meta.name, host = %meta.host, "adding command to worker pool");
        let run_meta = meta.clone();
        self.add_task(meta, async move {
            executor
                .run(&run_meta.name, &cmd, &run_meta.host)
                .await
        });
    }

    /// Enqueue an arbitrary unit of work. Used for collaborator calls that
    /// are not plain shell commands, such as resynchronization.
    pub fn add_task<F>(&mut self, meta: CommandMeta, work: F)
    where
        F: Future<Output = Result<CommandResult>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let completed = Arc::clone(&self.completed);
        let mut halt_rx = self.halt_tx.subscribe();
        self.assigned += 1;

        self.tasks.spawn(async move {
            let outcome = 'run: {
                if *halt_rx.borrow() {
                    break 'run CommandOutcome::Halted;
                }

                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'run CommandOutcome::Halted,
                    },
                    _ = wait_for_halt(&mut halt_rx) => break 'run CommandOutcome::Halted,
                };

                tokio::select! {
                    result = work => match result {
                        Ok(result) => CommandOutcome::Completed(result),
                        Err(err) => CommandOutcome::Failed(err.to_string()),
                    },
                    _ = wait_for_halt(&mut halt_rx) => CommandOutcome::Halted,
                }
            };
            completed.lock().push(CompletedCommand { meta, outcome });
        });
    }

    /// Block until every enqueued command has completed or been halted.
    pub async fn join(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "worker task aborted");
            }
        }
    }

    /// Wait up to `timeout` for all commands; returns whether the pool is
    /// drained. Used by the progress loop to poll partial results.
    pub async fn join_timeout(&mut self, timeout: Duration) -> bool {
        let _ = tokio::time::timeout(timeout, self.join()).await;
        self.is_done()
    }

    /// Request best-effort cancellation of outstanding commands. Commands
    /// already running are abandoned at their next await point; queued
    /// commands never start.
    pub fn halt_work(&self) {
        debug!("worker pool halt requested");
        let _ = self.halt_tx.send(true);
    }

    /// Raise an aggregated error if any command failed. Individual results
    /// remain retrievable through [`WorkerPool::completed_items`].
    pub fn check_results(&self) -> Result<()> {
        let completed = self.completed.lock();
        let failures: Vec<String> = completed
            .iter()
            .filter_map(|c| {
                c.failure_reason()
                    .map(|reason| format!("'{}' on {}: {}", c.meta.name, c.meta.host, reason))
            })
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(MirrorError::ExecutionErrors {
            failed: failures.len(),
            total: self.assigned,
            detail: failures.join("; "),
        })
    }

    /// Snapshot of every finished command so far.
    pub fn completed_items(&self) -> Vec<CompletedCommand> {
        self.completed.lock().clone()
    }

    pub fn assigned(&self) -> usize {
        self.assigned
    }

    pub fn is_done(&self) -> bool {
        self.completed.lock().len() == self.assigned
    }
}

async fn wait_for_halt(halt_rx: &mut watch::Receiver<bool>) {
    loop {
        if *halt_rx.borrow() {
            return;
        }
        if halt_rx.changed().await.is_err() {
            // Sender dropped without halting; never resolve.
            std::future::pending::<()>().await;
        }
    }
}
