//! Background scan queue: one job per workspace, bounded retry with
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use folio_core::config::PatternConfig;
use folio_core::types::Timestamp;

use crate::engine::PatternEngine;
use crate::error::PatternError;
use crate::types::ScanReport;

/// Something that can scan one workspace.
pub trait ScanRunner: Send + Sync {
    fn run_scan(&self, workspace_id: Uuid, now: Timestamp) -> Result<ScanReport, PatternError>;
}

impl ScanRunner for PatternEngine {
    fn run_scan(&self, workspace_id: Uuid, now: Timestamp) -> Result<ScanReport, PatternError> {
        self.scan(workspace_id, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PatternConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before retrying after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanJob {
    pub workspace_id: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(ScanReport),
    Retrying { attempt: u32, delay: Duration },
    Failed(PatternError),
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct ScanQueue {
    tx: mpsc::UnboundedSender<ScanJob>,
}

impl ScanQueue {
    pub fn new(runner: Arc<dyn ScanRunner>, policy: RetryPolicy) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = QueueWorker {
            rx,
            tx: tx.clone(),
            runner,
            policy,
        };
        (Self { tx }, worker)
    }

    pub fn enqueue(&self, workspace_id: Uuid) -> Result<(), PatternError> {
        self.tx
            .send(ScanJob {
                workspace_id,
                attempt: 1,
            })
            .map_err(|_| PatternError::QueueClosed)
    }

    /// Enqueue a job for every workspace with scans enabled.
    pub fn enqueue_eligible(&self, engine: &PatternEngine) -> Result<usize, PatternError> {
        let workspaces = engine.eligible_workspaces()?;
        for workspace_id in &workspaces {
            self.enqueue(*workspace_id)?;
        }
        info!(jobs = workspaces.len(), "Pattern scans enqueued");
        Ok(workspaces.len())
    }
}

/// Consumer side. Jobs run one at a time.
pub struct QueueWorker {
    rx: mpsc::UnboundedReceiver<ScanJob>,
    tx: mpsc::UnboundedSender<ScanJob>,
    runner: Arc<dyn ScanRunner>,
    policy: RetryPolicy,
}

impl QueueWorker {
    /// Run one job. A failed job with attempts left is re-enqueued after
    /// its backoff delay.
    pub fn handle(&self, job: ScanJob) -> JobOutcome {
        match self.runner.run_scan(job.workspace_id, Timestamp::now()) {
            Ok(report) => JobOutcome::Completed(report),
            Err(e) if job.attempt < self.policy.max_attempts => {
                let delay = self.policy.backoff(job.attempt);
                warn!(
                    workspace_id = %job.workspace_id,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Pattern scan failed, retrying"
                );
                let tx = self.tx.clone();
                let retry = ScanJob {
                    workspace_id: job.workspace_id,
                    attempt: job.attempt + 1,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(retry);
                });
                JobOutcome::Retrying {
                    attempt: job.attempt,
                    delay,
                }
            }
            Err(e) => {
                warn!(
                    workspace_id = %job.workspace_id,
                    attempts = job.attempt,
                    error = %e,
                    "Pattern scan failed permanently"
                );
                JobOutcome::Failed(e)
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Pattern queue worker started");
        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    let Some(job) = job else { return };
                    self.handle(job);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Pattern queue worker stopping");
                        return;
                    }
                }
            }
        }
    }
}
