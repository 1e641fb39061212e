//! Audit trail: outbox events become memory entries.
//!
//! Delivery is at-least-once. An event is marked delivered only after its
//! memory entry is written, so a crash in between records it twice.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use folio_core::error::FolioError;
use folio_core::events::DomainEvent;
use folio_storage::{Database, MemoryEntry, MemoryRepository, OutboxRepository};

pub const AUDIT_SOURCE: &str = "agent-audit";

const BATCH_SIZE: usize = 100;

pub struct AuditRecorder {
    outbox: OutboxRepository,
    memories: MemoryRepository,
}

impl AuditRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            outbox: OutboxRepository::new(Arc::clone(&db)),
            memories: MemoryRepository::new(db),
        }
    }

    /// Record every undelivered event. Returns how many memories were written.
    pub fn drain(&self) -> Result<usize, FolioError> {
        let mut recorded = 0;
        loop {
            let batch = self.outbox.pending(BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(recorded);
            }
            for entry in batch {
                if self.record(&entry.event)? {
                    recorded += 1;
                }
                self.outbox.mark_delivered(entry.id)?;
            }
        }
    }

    fn record(&self, event: &DomainEvent) -> Result<bool, FolioError> {
        // Workspace-less events (retention) have no audit home.
        let Some(workspace_id) = event.workspace_id() else {
            debug!(event = event.event_name(), "No workspace, skipping audit entry");
            return Ok(false);
        };
        let mut entry = MemoryEntry::new(
            workspace_id,
            event.space_id(),
            AUDIT_SOURCE,
            &describe(event),
        )
        .with_tags([AUDIT_SOURCE, event.event_name()])
        .with_metadata(serde_json::to_value(event)?);
        entry.created_at = event.timestamp();
        self.memories.insert(&entry)?;
        Ok(true)
    }

    /// Drain whenever `appended` fires until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, appended: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
        info!("Audit recorder started");
        loop {
            if let Err(e) = self.drain() {
                warn!(error = %e, "Audit drain failed");
            }
            tokio::select! {
                _ = appended.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Audit recorder stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// One-line human summary of an event.
fn describe(event: &DomainEvent) -> String {
    match event {
        DomainEvent::ActionExecuted {
            method,
            phase,
            status,
            attempts,
            ..
        } => format!("{} {} ({}, {} attempts)", method, phase, status, attempts),
        DomainEvent::ApprovalRequested { method, reason, .. } => {
            format!("Approval requested for {}: {}", method, reason)
        }
        DomainEvent::LoopCompleted { summary, .. } => format!("Agent loop: {}", summary),
        DomainEvent::PlanGenerated {
            horizon,
            significance,
            ..
        } => format!("New {} plan ({} change)", horizon, significance),
        DomainEvent::PlanStatusChanged { from, to, .. } => {
            format!("Plan moved from {} to {}", from, to)
        }
        DomainEvent::PatternDetected {
            pattern_type, title, ..
        } => format!("Pattern {}: {}", pattern_type, title),
        DomainEvent::ScheduleFired { cadences, .. } => {
            let names: Vec<String> = cadences.iter().map(ToString::to_string).collect();
            format!("Schedule fired: {}", names.join(", "))
        }
        other => other.event_name().replace('_', " "),
    }
}
