//! Periodic scheduler tick: find due notifications, dispatch, reschedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::{Dispatcher, RecurrenceCalculator, ScheduleError};
use crate::notification::{Notification, NotificationStatus, TriggerType};
use crate::storage::ServerDatabase;

/// Seconds subtracted from "now" when computing a REPEAT schedule's first
/// run, so a time-of-day equal to now still fires today.
const FIRST_RUN_EPSILON_SECS: i64 = 1;

/// What one call to [`NotificationScheduler::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    Completed(TickReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    /// REPEAT schedules that received their first run time.
    pub initialized: usize,
    pub dispatched: usize,
    pub deactivated: usize,
    pub failed: usize,
}

/// Clears the running flag on every exit path.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct NotificationScheduler {
    db: ServerDatabase,
    dispatcher: Arc<Dispatcher>,
    calculator: Arc<RecurrenceCalculator>,
    batch_size: u32,
    running: AtomicBool,
}

impl NotificationScheduler {
    pub fn new(
        db: ServerDatabase,
        dispatcher: Arc<Dispatcher>,
        calculator: Arc<RecurrenceCalculator>,
        batch_size: u32,
    ) -> Self {
        Self {
            db,
            dispatcher,
            calculator,
            batch_size: batch_size.max(1),
            running: AtomicBool::new(false),
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome, ScheduleError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`. Returns [`TickOutcome::Skipped`] without
    /// touching storage when a tick is already in flight.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome, ScheduleError> {
        let Some(_guard) = TickGuard::acquire(&self.running) else {
            debug!("Previous tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        let now_ms = now.timestamp_millis();
        let rows = self.db.due_notifications(now_ms, self.batch_size).await?;
        let mut report = TickReport {
            selected: rows.len(),
            ..TickReport::default()
        };

        for row in rows {
            let id = row.id.clone();
            let notification = match Notification::from_row(row) {
                Ok(n) => n,
                Err(e) => {
                    warn!(notification_id = %id, error = %e, "Skipping unreadable notification");
                    report.failed += 1;
                    continue;
                }
            };

            let due_at = match notification.next_run_at {
                Some(at) => at,
                None => {
                    let first = match self.next_occurrence(
                        &notification,
                        now - chrono::Duration::seconds(FIRST_RUN_EPSILON_SECS),
                    ) {
                        Ok(Some(first)) => first,
                        Ok(None) => {
                            warn!(notification_id = %id, "No occurrence within look-ahead window");
                            report.failed += 1;
                            continue;
                        }
                        Err(e) => {
                            warn!(notification_id = %id, error = %e, "Cannot resolve first run");
                            report.failed += 1;
                            continue;
                        }
                    };
                    report.initialized += 1;
                    let first_ms = first.timestamp_millis();
                    if first > now {
                        self.db.set_next_run(&id, first_ms, now_ms).await?;
                        debug!(notification_id = %id, next_run_at = %first, "First run scheduled");
                        continue;
                    }
                    first_ms
                }
            };

            match self
                .dispatcher
                .dispatch(&notification, TriggerType::Scheduled, Some(due_at))
                .await
            {
                Ok(_) => report.dispatched += 1,
                Err(e) => {
                    error!(notification_id = %id, error = %e, "Dispatch failed");
                    report.failed += 1;
                }
            }

            let next = if notification.is_repeating() {
                match self.next_occurrence(&notification, now) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(notification_id = %id, error = %e, "Repeat settings unusable");
                        None
                    }
                }
            } else {
                None
            };
            let status = if next.is_some() {
                NotificationStatus::Active
            } else {
                report.deactivated += 1;
                NotificationStatus::Inactive
            };
            self.db
                .record_run(&id, now_ms, next.map(|t| t.timestamp_millis()), status)
                .await?;
        }

        Ok(TickOutcome::Completed(report))
    }

    fn next_occurrence(
        &self,
        notification: &Notification,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let rule = notification.recurrence()?;
        Ok(self.calculator.next_run(&rule, after)?)
    }

    async fn run_tick(&self) {
        match self.tick().await {
            Ok(TickOutcome::Skipped) => {}
            Ok(TickOutcome::Completed(report)) if report.selected > 0 => {
                info!(
                    selected = report.selected,
                    initialized = report.initialized,
                    dispatched = report.dispatched,
                    deactivated = report.deactivated,
                    failed = report.failed,
                    "Scheduler tick complete"
                );
            }
            Ok(TickOutcome::Completed(_)) => {}
            Err(e) => error!(error = %e, "Scheduler tick failed"),
        }
    }
}

/// Run a tick every `every` until `shutdown` changes. Ticks run inline, so
/// shutdown waits for the one in flight; missed intervals are skipped.
pub fn spawn_scheduler(
    scheduler: Arc<NotificationScheduler>,
    every: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = every.as_secs(),
            batch_size = scheduler.batch_size,
            "Notification scheduler started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => scheduler.run_tick().await,
                _ = shutdown.changed() => {
                    info!("Notification scheduler shutting down");
                    return;
                }
            }
        }
    })
}
