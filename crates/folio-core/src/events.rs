use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Cadence, Timestamp};

/// All domain events emitted by the agent pipeline.
///
/// Events are published to an [`EventSink`] and consumed by:
/// - The audit recorder (persisted as audit memory entries)
/// - The SSE broadcast channel (for live clients)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DomainEvent {
    /// An action reached a terminal phase in the executor.
    ActionExecuted {
        workspace_id: Uuid,
        space_id: Uuid,
        user_id: Uuid,
        method: String,
        phase: String,
        status: String,
        attempts: u32,
        error: Option<String>,
        timestamp: Timestamp,
    },

    /// An action was held for human approval and a token was issued.
    ApprovalRequested {
        workspace_id: Uuid,
        space_id: Uuid,
        user_id: Uuid,
        method: String,
        reason: String,
        token: String,
        expires_at: Timestamp,
        timestamp: Timestamp,
    },

    /// One autonomous loop run finished.
    LoopCompleted {
        workspace_id: Uuid,
        space_id: Uuid,
        user_id: Uuid,
        summary: String,
        results: serde_json::Value,
        timestamp: Timestamp,
    },

    /// The planning cascade stored a new plan.
    PlanGenerated {
        workspace_id: Uuid,
        space_id: Uuid,
        plan_id: Uuid,
        horizon: String,
        significance: String,
        timestamp: Timestamp,
    },

    /// A pending plan was approved or rejected.
    PlanStatusChanged {
        workspace_id: Uuid,
        plan_id: Uuid,
        from: String,
        to: String,
        timestamp: Timestamp,
    },

    /// The pattern engine recorded a new detection.
    PatternDetected {
        workspace_id: Uuid,
        detection_id: Uuid,
        pattern_type: String,
        severity: String,
        title: String,
        surface: bool,
        timestamp: Timestamp,
    },

    /// The hourly tick fired one or more cadences for a space.
    ScheduleFired {
        workspace_id: Uuid,
        space_id: Uuid,
        cadences: Vec<Cadence>,
        timestamp: Timestamp,
    },

    /// The retention job purged trashed pages.
    TrashPurged {
        pages_purged: usize,
        cutoff: Timestamp,
        timestamp: Timestamp,
    },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::ActionExecuted { timestamp, .. }
            | DomainEvent::ApprovalRequested { timestamp, .. }
            | DomainEvent::LoopCompleted { timestamp, .. }
            | DomainEvent::PlanGenerated { timestamp, .. }
            | DomainEvent::PlanStatusChanged { timestamp, .. }
            | DomainEvent::PatternDetected { timestamp, .. }
            | DomainEvent::ScheduleFired { timestamp, .. }
            | DomainEvent::TrashPurged { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a human-readable event name for logging and SSE.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::ActionExecuted { .. } => "action_executed",
            DomainEvent::ApprovalRequested { .. } => "approval_requested",
            DomainEvent::LoopCompleted { .. } => "loop_completed",
            DomainEvent::PlanGenerated { .. } => "plan_generated",
            DomainEvent::PlanStatusChanged { .. } => "plan_status_changed",
            DomainEvent::PatternDetected { .. } => "pattern_detected",
            DomainEvent::ScheduleFired { .. } => "schedule_fired",
            DomainEvent::TrashPurged { .. } => "trash_purged",
        }
    }

    /// The workspace the event belongs to, if any.
    pub fn workspace_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::ActionExecuted { workspace_id, .. }
            | DomainEvent::ApprovalRequested { workspace_id, .. }
            | DomainEvent::LoopCompleted { workspace_id, .. }
            | DomainEvent::PlanGenerated { workspace_id, .. }
            | DomainEvent::PlanStatusChanged { workspace_id, .. }
            | DomainEvent::PatternDetected { workspace_id, .. }
            | DomainEvent::ScheduleFired { workspace_id, .. } => Some(*workspace_id),
            DomainEvent::TrashPurged { .. } => None,
        }
    }

    /// The space the event belongs to, if any.
    pub fn space_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::ActionExecuted { space_id, .. }
            | DomainEvent::ApprovalRequested { space_id, .. }
            | DomainEvent::LoopCompleted { space_id, .. }
            | DomainEvent::PlanGenerated { space_id, .. }
            | DomainEvent::ScheduleFired { space_id, .. } => Some(*space_id),
            _ => None,
        }
    }
}

/// Destination for domain events.
///
/// Publishing never fails from the caller's point of view; sinks log their
/// own delivery problems.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Sink that keeps every event in memory. Used by tests and tooling.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan_event() -> DomainEvent {
        DomainEvent::PlanGenerated {
            workspace_id: Uuid::new_v4(),
            space_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            horizon: "daily".into(),
            significance: "new".into(),
            timestamp: Timestamp(1_700_000_000),
        }
    }

    #[test]
    fn test_event_name_and_timestamp() {
        let event = sample_plan_event();
        assert_eq!(event.event_name(), "plan_generated");
        assert_eq!(event.timestamp(), Timestamp(1_700_000_000));
        assert!(event.workspace_id().is_some());
        assert!(event.space_id().is_some());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(sample_plan_event()).unwrap();
        assert_eq!(json["event"], "plan_generated");
        assert_eq!(json["horizon"], "daily");
    }

    #[test]
    fn test_trash_purged_has_no_workspace() {
        let event = DomainEvent::TrashPurged {
            pages_purged: 4,
            cutoff: Timestamp(0),
            timestamp: Timestamp::now(),
        };
        assert_eq!(event.workspace_id(), None);
        assert_eq!(event.space_id(), None);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.publish(sample_plan_event());
        sink.publish(sample_plan_event());
        assert_eq!(sink.events().len(), 2);
    }
}
