//! Transactional outbox for domain events.
//!
//! Every published event is appended to `event_outbox` before it is
//! broadcast. Consumers drain undelivered rows and mark them delivered after
//! handling, which gives at-least-once delivery across restarts.

use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use folio_core::error::FolioError;
use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::Timestamp;

use crate::db::{sql_err, Database};

/// An undelivered outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub event: DomainEvent,
    pub created_at: Timestamp,
}

pub struct OutboxRepository {
    db: Arc<Database>,
}

impl OutboxRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, event: &DomainEvent) -> Result<i64, FolioError> {
        let payload = serde_json::to_string(event)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO event_outbox (event_name, workspace_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    event.event_name(),
                    event.workspace_id().map(|id| id.to_string()),
                    payload,
                    Timestamp::now().0,
                ],
            )
            .map_err(sql_err("Failed to append event"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Oldest undelivered events first.
    pub fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, FolioError> {
        let rows: Vec<(i64, String, i64)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, payload, created_at FROM event_outbox
                     WHERE delivered_at IS NULL ORDER BY id LIMIT ?1",
                )
                .map_err(sql_err("Failed to prepare outbox query"))?;
            let rows = stmt
                .query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(sql_err("Failed to query outbox"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read outbox row"))
        })?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, payload, created_at) in rows {
            match serde_json::from_str::<DomainEvent>(&payload) {
                Ok(event) => entries.push(OutboxEntry {
                    id,
                    event,
                    created_at: Timestamp(created_at),
                }),
                Err(e) => {
                    // Unreadable rows would block the queue forever.
                    warn!(outbox_id = id, error = %e, "Dropping undecodable outbox event");
                    self.mark_delivered(id)?;
                }
            }
        }
        Ok(entries)
    }

    pub fn mark_delivered(&self, id: i64) -> Result<(), FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE event_outbox SET delivered_at = ?2 WHERE id = ?1",
                rusqlite::params![id, Timestamp::now().0],
            )
            .map_err(sql_err("Failed to mark event delivered"))?;
            Ok(())
        })
    }

    /// Remove delivered rows older than `before`.
    pub fn purge_delivered(&self, before: Timestamp) -> Result<usize, FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM event_outbox WHERE delivered_at IS NOT NULL AND delivered_at < ?1",
                [before.0],
            )
            .map_err(sql_err("Failed to purge outbox"))
        })
    }
}

/// Event sink backed by the outbox with a live broadcast for streaming clients.
pub struct EventBus {
    outbox: OutboxRepository,
    live: broadcast::Sender<DomainEvent>,
    appended: Arc<Notify>,
}

impl EventBus {
    pub fn new(db: Arc<Database>) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            outbox: OutboxRepository::new(db),
            live,
            appended: Arc::new(Notify::new()),
        }
    }

    /// Receive events as they are published.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.live.subscribe()
    }

    /// Signalled whenever a new event lands in the outbox.
    pub fn appended(&self) -> Arc<Notify> {
        Arc::clone(&self.appended)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: DomainEvent) {
        match self.outbox.append(&event) {
            Ok(id) => {
                debug!(outbox_id = id, event = event.event_name(), "Event appended");
                self.appended.notify_one();
            }
            Err(e) => warn!(event = event.event_name(), error = %e, "Failed to persist event"),
        }
        // No live subscribers is not an error.
        let _ = self.live.send(event);
    }
}
