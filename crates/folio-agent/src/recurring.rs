//! Recurring jobs driven by cron expressions.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// A named cron schedule with a defined next-fire-time calculation.
#[derive(Debug, Clone)]
pub struct RecurringTask {
    name: String,
    expression: String,
    schedule: Schedule,
}

impl RecurringTask {
    /// Accepts 5-field crontab syntax (seconds are assumed zero) or the
    /// 6/7-field syntax with seconds and optional year.
    pub fn new(name: &str, expression: &str) -> Result<Self, SchedulerError> {
        let normalized = normalize_expression(expression)?;
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidExpression {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Sleep until each fire time and run `job`, until `shutdown` flips to true.
    pub async fn run<F, Fut>(&self, mut shutdown: watch::Receiver<bool>, mut job: F)
    where
        F: FnMut(DateTime<Utc>) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(task = %self.name, expression = %self.expression, "Recurring task started");
        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire(now) else {
                warn!(task = %self.name, "No future fire time, stopping");
                return;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(task = %self.name, next = %next, "Waiting for next fire");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    debug!(task = %self.name, "Firing");
                    job(next).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(task = %self.name, "Recurring task stopping");
                        return;
                    }
                }
            }
        }
    }
}

fn normalize_expression(expression: &str) -> Result<String, SchedulerError> {
    let expression = expression.trim();
    match expression.split_whitespace().count() {
        5 => Ok(format!("0 {}", expression)),
        6 | 7 => Ok(expression.to_string()),
        n => Err(SchedulerError::InvalidExpression {
            expression: expression.to_string(),
            message: format!("expected 5, 6, or 7 fields, got {}", n),
        }),
    }
}
