//! Trash retention purge.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use folio_core::error::FolioError;
use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::Timestamp;

use crate::approvals::ApprovalRepository;
use crate::content::PageRepository;
use crate::db::Database;
use crate::outbox::OutboxRepository;

/// Result of a retention run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeResult {
    pub pages_purged: usize,
    pub approvals_purged: usize,
    pub events_purged: usize,
    pub cutoff: Timestamp,
}

/// Purges trashed pages and expired bookkeeping past the retention window.
pub struct RetentionManager {
    pages: PageRepository,
    approvals: ApprovalRepository,
    outbox: OutboxRepository,
}

impl RetentionManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            pages: PageRepository::new(Arc::clone(&db)),
            approvals: ApprovalRepository::new(Arc::clone(&db)),
            outbox: OutboxRepository::new(db),
        }
    }

    /// Run one purge cycle relative to `now`.
    pub fn run_purge(
        &self,
        retention_days: u32,
        now: Timestamp,
        events: &dyn EventSink,
    ) -> Result<PurgeResult, FolioError> {
        let cutoff = now.minus_days(retention_days);
        let result = PurgeResult {
            pages_purged: self.pages.purge_trashed(cutoff)?,
            approvals_purged: self.approvals.purge_expired(cutoff)?,
            events_purged: self.outbox.purge_delivered(cutoff)?,
            cutoff,
        };

        info!(
            pages = result.pages_purged,
            approvals = result.approvals_purged,
            events = result.events_purged,
            retention_days,
            "Retention purge completed"
        );

        if result.pages_purged > 0 {
            events.publish(DomainEvent::TrashPurged {
                pages_purged: result.pages_purged,
                cutoff,
                timestamp: now,
            });
        }
        Ok(result)
    }
}
