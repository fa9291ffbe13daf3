//! Cron-triggered task creation.
//!
//! Ticks on a fixed interval, evaluates enabled schedules' cron
//! expressions, and enqueues a task for each schedule that came due since
//! the last tick. Occurrences missed while the daemon was down are not
//! replayed. Expressions use the seconds-field cron syntax
//! (`sec min hour dom mon dow`).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::TaskQueue;
use crate::store::model::NewTask;
use crate::store::Database;
use crate::worker::unit::sleep_or_cancel;

/// Default priority for scheduler-created tasks.
const SCHEDULED_TASK_PRIORITY: i64 = 5;

/// Evaluates schedules and feeds due tasks into the queue.
pub struct ScheduleEngine {
    db: Arc<dyn Database>,
    queue: TaskQueue,
    tick_interval: Duration,
}

impl ScheduleEngine {
    pub fn new(db: Arc<dyn Database>, queue: TaskQueue) -> Self {
        Self {
            db,
            queue,
            tick_interval: Duration::from_secs(30),
        }
    }

    #[cfg(test)]
    fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Tick loop; exits when the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Schedule engine started");
        let mut last_tick = Utc::now();

        loop {
            sleep_or_cancel(self.tick_interval, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            let now = Utc::now();
            self.tick(last_tick, now).await;
            last_tick = now;
        }
        info!("Schedule engine stopped");
    }

    /// Evaluate all enabled schedules against the `(since, now]` window,
    /// enqueueing at most one task per due schedule.
    pub async fn tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) {
        let schedules = match self.db.list_enabled_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "Failed to load schedules");
                return;
            }
        };

        for schedule in schedules {
            let cron = match CronSchedule::from_str(&schedule.cron_expr) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(schedule_id = schedule.id, expr = %schedule.cron_expr, error = %e,
                          "Invalid cron expression");
                    continue;
                }
            };

            // Fire from the later of the window start and the recorded
            // last run, so restarting mid-window never double-fires.
            let reference = schedule.last_run.map_or(since, |lr| lr.max(since));
            let due = cron.after(&reference).next().filter(|t| *t <= now);
            if due.is_none() {
                continue;
            }

            let task = NewTask {
                title: schedule.task_title.clone(),
                prompt: schedule.task_prompt.clone(),
                project_id: schedule.project_id,
                worker_id: schedule.worker_id,
                priority: SCHEDULED_TASK_PRIORITY,
                template_id: None,
            };

            match self.queue.enqueue(&task).await {
                Ok(task_id) => {
                    info!(schedule_id = schedule.id, task_id, "Schedule fired");
                    let next_run = cron.after(&now).next();
                    if let Err(e) = self.db.touch_schedule(schedule.id, now, next_run).await {
                        warn!(schedule_id = schedule.id, error = %e, "Schedule touch failed");
                    }
                }
                Err(e) => {
                    warn!(schedule_id = schedule.id, error = %e, "Scheduled enqueue failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::Schedule;
    use crate::store::LibSqlBackend;

    async fn engine() -> (ScheduleEngine, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = TaskQueue::new(Arc::clone(&db));
        (
            ScheduleEngine::new(Arc::clone(&db), queue).with_tick_interval(Duration::from_millis(50)),
            db,
        )
    }

    fn every_second(name: &str) -> Schedule {
        Schedule {
            id: 0,
            name: name.into(),
            cron_expr: "* * * * * *".into(),
            task_title: format!("{name} task"),
            task_prompt: "scheduled work".into(),
            project_id: None,
            worker_id: None,
            enabled: true,
            last_run: None,
            next_run: None,
        }
    }

    #[tokio::test]
    async fn due_schedule_enqueues_one_task() {
        let (engine, db) = engine().await;
        db.create_schedule(&every_second("nightly")).await.unwrap();

        let now = Utc::now();
        engine.tick(now - chrono::Duration::seconds(5), now).await;

        let pending = db.list_pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "nightly task");
        assert_eq!(pending[0].priority, SCHEDULED_TASK_PRIORITY);
    }

    #[tokio::test]
    async fn last_run_prevents_double_fire() {
        let (engine, db) = engine().await;
        db.create_schedule(&every_second("dedup")).await.unwrap();

        let now = Utc::now();
        engine.tick(now - chrono::Duration::seconds(5), now).await;
        // Re-run the same window: last_run is now recorded at `now`, so
        // nothing new is due.
        engine.tick(now - chrono::Duration::seconds(5), now).await;

        assert_eq!(db.list_pending_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn future_schedule_does_not_fire() {
        let (engine, db) = engine().await;
        let mut schedule = every_second("future");
        // Fires only at midnight on Jan 1.
        schedule.cron_expr = "0 0 0 1 1 *".into();
        db.create_schedule(&schedule).await.unwrap();

        let now = Utc::now();
        engine.tick(now - chrono::Duration::seconds(5), now).await;

        assert!(db.list_pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_expression_is_skipped() {
        let (engine, db) = engine().await;
        let mut schedule = every_second("broken");
        schedule.cron_expr = "not a cron".into();
        db.create_schedule(&schedule).await.unwrap();
        db.create_schedule(&every_second("working")).await.unwrap();

        let now = Utc::now();
        engine.tick(now - chrono::Duration::seconds(5), now).await;

        // The broken schedule is skipped; the valid one still fires.
        let pending = db.list_pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "working task");
    }
}
