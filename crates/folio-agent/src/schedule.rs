//! Hourly cadence tick.
//!
//! Each tick walks every active space, decides which cadences are due in the
//! space's time zone, runs the loop once for them, creates the weekly review
//! page when due, and persists last-run markers only for what fired.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::{local_date, parse_timezone, week_key, Cadence, Timestamp};
use folio_storage::{Database, ReviewPromptRepository, WorkspaceRepository};

use crate::error::AgentError;
use crate::executor::ActionExecutor;
use crate::orchestrator::{AgentLoop, LoopOutcome};
use crate::settings::{AgentSettings, AutonomySchedule, RunMarker, SettingsService};
use crate::types::{ActionMethod, ActionPhase, ActionResult, ActorContext, ProposedAction};

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn ran_today(last: Option<DateTime<Utc>>, today: NaiveDate, tz: Tz) -> bool {
    last.is_some_and(|at| local_date(at, tz) == today)
}

/// Whether `cadence` should fire at `now` for this schedule.
pub fn cadence_due(schedule: &AutonomySchedule, cadence: Cadence, now: DateTime<Utc>) -> bool {
    if !schedule.cadence_enabled(cadence) {
        return false;
    }
    let tz = parse_timezone(&schedule.timezone);
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    if local.hour() != schedule.hour || ran_today(schedule.last_run(cadence), today, tz) {
        return false;
    }
    match cadence {
        Cadence::Daily => true,
        Cadence::Weekly => local.weekday().num_days_from_sunday() == schedule.weekday,
        Cadence::Monthly => local.day() == schedule.day_of_month.min(last_day_of_month(today)),
    }
}

/// Whether the weekly review page should be created at `now`.
pub fn weekly_review_due(schedule: &AutonomySchedule, now: DateTime<Utc>) -> bool {
    if !schedule.weekly_review_enabled {
        return false;
    }
    let tz = parse_timezone(&schedule.timezone);
    let local = now.with_timezone(&tz);
    local.hour() == schedule.hour
        && local.weekday().num_days_from_sunday() == schedule.weekday
        && !ran_today(schedule.last_weekly_review_run, local.date_naive(), tz)
}

/// What fired for one space.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRun {
    pub space_id: Uuid,
    pub cadences: Vec<Cadence>,
    pub loop_outcome: Option<LoopOutcome>,
    pub weekly_review: Option<ActionResult>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub spaces_checked: usize,
    pub runs: Vec<ScheduledRun>,
}

pub struct CadenceScheduler {
    workspaces: WorkspaceRepository,
    reviews: ReviewPromptRepository,
    settings: SettingsService,
    agent_loop: Arc<AgentLoop>,
    executor: Arc<ActionExecutor>,
    events: Arc<dyn EventSink>,
}

impl CadenceScheduler {
    pub fn new(
        db: Arc<Database>,
        agent_loop: Arc<AgentLoop>,
        executor: Arc<ActionExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            workspaces: WorkspaceRepository::new(Arc::clone(&db)),
            reviews: ReviewPromptRepository::new(Arc::clone(&db)),
            settings: SettingsService::new(db),
            agent_loop,
            executor,
            events,
        }
    }

    /// Evaluate every active space. Failures in one space are logged and do
    /// not stop the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, AgentError> {
        let mut report = TickReport::default();
        for workspace in self.workspaces.list_workspaces()? {
            for space in self.workspaces.list_active_spaces(workspace.id)? {
                report.spaces_checked += 1;
                let settings = match self.settings.resolve(workspace.id, Some(space.id)) {
                    Ok(s) if s.enabled => s,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(space_id = %space.id, error = %e, "Failed to resolve agent settings");
                        continue;
                    }
                };

                let schedule = &settings.autonomy_schedule;
                let due: Vec<Cadence> = Cadence::ALL
                    .into_iter()
                    .filter(|c| cadence_due(schedule, *c, now))
                    .collect();
                let review_due = weekly_review_due(schedule, now);
                if due.is_empty() && !review_due {
                    continue;
                }

                let Some(owner) = workspace.owner_id else {
                    warn!(workspace_id = %workspace.id, "Workspace has no owner, skipping scheduled run");
                    continue;
                };
                let actor = ActorContext {
                    workspace_id: workspace.id,
                    space_id: space.id,
                    user_id: owner,
                };
                match self.fire(&actor, &settings, &due, review_due, now).await {
                    Ok(run) => report.runs.push(run),
                    Err(e) => warn!(space_id = %space.id, error = %e, "Scheduled run failed"),
                }
            }
        }
        info!(
            spaces = report.spaces_checked,
            fired = report.runs.len(),
            "Cadence tick finished"
        );
        Ok(report)
    }

    /// Fire `cadences` (and the weekly review when asked) for one space,
    /// recording last-run markers for what actually ran.
    pub async fn fire(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        cadences: &[Cadence],
        weekly_review: bool,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRun, AgentError> {
        let mut markers = Vec::new();
        let mut fired = Vec::new();

        // Several cadences due in the same hour share one loop run.
        let loop_outcome = if cadences.is_empty() {
            None
        } else if settings.loop_enabled() {
            // A failed loop leaves its cadences due; the weekly review still runs.
            match self.agent_loop.run_loop(actor, settings, now).await {
                Ok(outcome) => {
                    fired.extend_from_slice(cadences);
                    markers.extend(cadences.iter().map(|c| RunMarker::Cadence(*c)));
                    Some(outcome)
                }
                Err(e) => {
                    warn!(space_id = %actor.space_id, error = %e, "Loop run failed, cadences not fired");
                    None
                }
            }
        } else {
            debug!(space_id = %actor.space_id, "Autonomous loop disabled, cadences not fired");
            None
        };

        let review = if weekly_review {
            let result = self.create_weekly_review(actor, settings, now).await;
            if result.phase != ActionPhase::Failed {
                markers.push(RunMarker::WeeklyReview);
            }
            Some(result)
        } else {
            None
        };

        self.settings
            .record_runs(actor.workspace_id, actor.space_id, &markers, now)?;

        if !fired.is_empty() {
            self.events.publish(DomainEvent::ScheduleFired {
                workspace_id: actor.workspace_id,
                space_id: actor.space_id,
                cadences: fired.clone(),
                timestamp: Timestamp::now(),
            });
        }

        Ok(ScheduledRun {
            space_id: actor.space_id,
            cadences: fired,
            loop_outcome,
            weekly_review: review,
        })
    }

    async fn create_weekly_review(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        now: DateTime<Utc>,
    ) -> ActionResult {
        let today = local_date(now, parse_timezone(&settings.autonomy_schedule.timezone));
        let week = week_key(today);
        let prompts = self
            .reviews
            .list_pending(actor.space_id, Some(&week))
            .unwrap_or_else(|e| {
                warn!(space_id = %actor.space_id, error = %e, "Failed to load review prompts");
                Vec::new()
            });

        let mut content = String::from("## Wins\n\n## Misses\n\n## Next week\n");
        if !prompts.is_empty() {
            content.push_str("\n## Questions\n");
            for prompt in &prompts {
                content.push_str(&format!("- {}\n", prompt.question));
            }
        }

        let proposal = ProposedAction::new(
            ActionMethod::PageCreate.as_str(),
            json!({ "title": format!("Weekly Review {}", week), "content": content }),
        );
        self.executor.execute(actor, settings, &proposal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::InMemoryApprovalLedger;
    use crate::context::ContextGatherer;
    use crate::dispatch::InternalProcessor;
    use crate::executor::ExecutorOptions;
    use chrono::TimeZone;
    use folio_core::config::ContextLimits;
    use folio_core::events::CollectingSink;
    use folio_storage::PageRepository;
    use std::time::Duration;

    // 2026-10-18 is a Sunday.
    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, 5, 0).unwrap()
    }

    fn schedule() -> AutonomySchedule {
        AutonomySchedule {
            daily_enabled: true,
            weekly_enabled: true,
            monthly_enabled: true,
            weekly_review_enabled: true,
            hour: 8,
            weekday: 0,
            day_of_month: 18,
            ..AutonomySchedule::default()
        }
    }

    #[test]
    fn test_daily_due_once_per_local_day() {
        let mut s = schedule();
        assert!(cadence_due(&s, Cadence::Daily, utc(18, 8)));
        assert!(!cadence_due(&s, Cadence::Daily, utc(18, 9)));

        s.last_daily_run = Some(utc(18, 8));
        assert!(!cadence_due(&s, Cadence::Daily, utc(18, 8)));
        assert!(cadence_due(&s, Cadence::Daily, utc(19, 8)));
    }

    #[test]
    fn test_hour_is_local() {
        let mut s = schedule();
        s.timezone = "America/New_York".into();
        // 12:05 UTC is 08:05 in New York (EDT).
        assert!(cadence_due(&s, Cadence::Daily, utc(18, 12)));
        assert!(!cadence_due(&s, Cadence::Daily, utc(18, 8)));
    }

    #[test]
    fn test_weekly_and_monthly_days() {
        let s = schedule();
        assert!(cadence_due(&s, Cadence::Weekly, utc(18, 8)));
        assert!(!cadence_due(&s, Cadence::Weekly, utc(19, 8)));
        assert!(cadence_due(&s, Cadence::Monthly, utc(18, 8)));
        assert!(!cadence_due(&s, Cadence::Monthly, utc(17, 8)));
        assert!(weekly_review_due(&s, utc(18, 8)));
    }

    #[test]
    fn test_monthly_clamps_to_last_day() {
        let s = AutonomySchedule {
            monthly_enabled: true,
            day_of_month: 31,
            ..AutonomySchedule::default()
        };
        let nov_30 = Utc.with_ymd_and_hms(2026, 11, 30, 8, 0, 0).unwrap();
        assert!(cadence_due(&s, Cadence::Monthly, nov_30));
        assert_eq!(last_day_of_month(NaiveDate::from_ymd_opt(2028, 2, 3).unwrap()), 29);
        assert_eq!(last_day_of_month(NaiveDate::from_ymd_opt(2026, 12, 3).unwrap()), 31);
    }

    #[test]
    fn test_disabled_cadence_never_due() {
        let s = AutonomySchedule::default();
        for cadence in Cadence::ALL {
            assert!(!cadence_due(&s, cadence, utc(18, 8)));
        }
        assert!(!weekly_review_due(&s, utc(18, 8)));
    }

    struct Harness {
        db: Arc<Database>,
        events: Arc<CollectingSink>,
        scheduler: CadenceScheduler,
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        let events = Arc::new(CollectingSink::new());
        let ledger = Arc::new(InMemoryApprovalLedger::new());
        let processor = Arc::new(InternalProcessor::new(Arc::clone(&db), ledger.clone(), 600));
        let executor = Arc::new(ActionExecutor::new(
            Arc::clone(&db),
            ledger,
            processor,
            events.clone(),
            ExecutorOptions {
                retry_delay: Duration::ZERO,
                ..ExecutorOptions::default()
            },
        ));
        let agent_loop = Arc::new(AgentLoop::new(
            Arc::clone(&db),
            ContextGatherer::new(Arc::clone(&db), ContextLimits::default()),
            None,
            Arc::clone(&executor),
            events.clone(),
            500,
        ));
        let scheduler = CadenceScheduler::new(Arc::clone(&db), agent_loop, executor, events.clone());
        Harness { db, events, scheduler }
    }

    fn enable(db: &Arc<Database>, workspace_id: Uuid) {
        SettingsService::new(Arc::clone(db))
            .update(
                workspace_id,
                None,
                &json!({
                    "enabled": true,
                    "enableAutonomousLoop": true,
                    "autonomySchedule": {
                        "dailyEnabled": true,
                        "weeklyEnabled": true,
                        "weeklyReviewEnabled": true,
                        "hour": 8,
                        "weekday": 0
                    }
                }),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_tick_fires_and_records_runs() {
        let h = harness();
        let workspaces = WorkspaceRepository::new(Arc::clone(&h.db));
        let ws = workspaces.create_workspace("Home", Some(Uuid::new_v4())).unwrap();
        let space = workspaces.create_space(ws.id, "Personal").unwrap();
        enable(&h.db, ws.id);

        let report = h.scheduler.tick(utc(18, 8)).await.unwrap();
        assert_eq!(report.runs.len(), 1);
        let run = &report.runs[0];
        assert_eq!(run.cadences, vec![Cadence::Daily, Cadence::Weekly]);
        assert!(run.loop_outcome.as_ref().unwrap().actions.is_empty());
        assert_eq!(run.weekly_review.as_ref().unwrap().phase, ActionPhase::Executed);

        let page = PageRepository::new(Arc::clone(&h.db))
            .find_by_generated_key(space.id, "weekly-review:2026-W42")
            .unwrap();
        assert!(page.is_some());

        let settings = SettingsService::new(Arc::clone(&h.db))
            .resolve(ws.id, Some(space.id))
            .unwrap();
        assert_eq!(settings.autonomy_schedule.last_daily_run, Some(utc(18, 8)));
        assert_eq!(settings.autonomy_schedule.last_monthly_run, None);
        assert!(settings.autonomy_schedule.last_weekly_review_run.is_some());
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| e.event_name() == "schedule_fired"));

        // Same hour again: nothing is due.
        let again = h.scheduler.tick(utc(18, 8)).await.unwrap();
        assert!(again.runs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_loop_still_writes_weekly_review() {
        let h = harness();
        let workspaces = WorkspaceRepository::new(Arc::clone(&h.db));
        let ws = workspaces.create_workspace("Home", Some(Uuid::new_v4())).unwrap();
        let space = workspaces.create_space(ws.id, "Personal").unwrap();
        enable(&h.db, ws.id);
        // Context gathering reads goals, so the loop run fails.
        h.db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE goals").unwrap();
            Ok(())
        })
        .unwrap();

        let report = h.scheduler.tick(utc(18, 8)).await.unwrap();
        assert_eq!(report.runs.len(), 1);
        let run = &report.runs[0];
        assert!(run.cadences.is_empty());
        assert!(run.loop_outcome.is_none());
        assert_eq!(run.weekly_review.as_ref().unwrap().phase, ActionPhase::Executed);

        let page = PageRepository::new(Arc::clone(&h.db))
            .find_by_generated_key(space.id, "weekly-review:2026-W42")
            .unwrap();
        assert!(page.is_some());

        let settings = SettingsService::new(Arc::clone(&h.db))
            .resolve(ws.id, Some(space.id))
            .unwrap();
        assert_eq!(settings.autonomy_schedule.last_daily_run, None);
        assert!(settings.autonomy_schedule.last_weekly_review_run.is_some());
        assert!(!h
            .events
            .events()
            .iter()
            .any(|e| e.event_name() == "schedule_fired"));
    }

    #[tokio::test]
    async fn test_tick_skips_workspace_without_owner() {
        let h = harness();
        let workspaces = WorkspaceRepository::new(Arc::clone(&h.db));
        let ws = workspaces.create_workspace("Shared", None).unwrap();
        workspaces.create_space(ws.id, "Team").unwrap();
        enable(&h.db, ws.id);

        let report = h.scheduler.tick(utc(18, 8)).await.unwrap();
        assert_eq!(report.spaces_checked, 1);
        assert!(report.runs.is_empty());
        assert!(h.events.events().is_empty());
    }
}
