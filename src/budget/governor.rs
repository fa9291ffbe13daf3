//! Token budget governor — per-worker daily zone tracking and alerts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;

use crate::budget::BudgetZone;
use crate::error::StorageError;
use crate::notify::Dispatcher;
use crate::store::model::TokenBudget;
use crate::store::Database;

/// Computes budget zones from the usage ledger and raises an alert when a
/// worker's zone escalates. The last observed zone per worker is explicit
/// instance state with the lifetime of the daemon process.
pub struct Governor {
    db: Arc<dyn Database>,
    notify: Arc<Dispatcher>,
    last_zone: Mutex<HashMap<i64, BudgetZone>>,
}

impl Governor {
    pub fn new(db: Arc<dyn Database>, notify: Arc<Dispatcher>) -> Self {
        Self {
            db,
            notify,
            last_zone: Mutex::new(HashMap::new()),
        }
    }

    /// Compute the current zone for a worker from today's token usage
    /// against its configured daily limit (defaults when unconfigured).
    pub async fn budget_zone(&self, worker_id: i64) -> Result<BudgetZone, StorageError> {
        let today = today();
        let used = self.db.usage_for_day(worker_id, &today).await?;

        let budget = self
            .db
            .get_budget(worker_id)
            .await?
            .unwrap_or_else(|| TokenBudget { worker_id, ..TokenBudget::default() });

        if budget.daily_limit == 0 {
            return Ok(BudgetZone::Green);
        }

        let pct = used * 100 / budget.daily_limit;
        let zone = if pct >= budget.red_pct {
            BudgetZone::Red
        } else if pct >= budget.orange_pct {
            BudgetZone::Orange
        } else if pct >= budget.yellow_pct {
            BudgetZone::Yellow
        } else {
            BudgetZone::Green
        };
        Ok(zone)
    }

    /// Recompute the zone and alert only when it has escalated since the
    /// last observation. De-escalation and repeated checks within the same
    /// zone never alert — this hysteresis avoids alert storms when usage
    /// hovers near a threshold. Returns the zone that triggered an alert.
    pub async fn check_budget(&self, worker_id: i64) -> Option<BudgetZone> {
        let zone = match self.budget_zone(worker_id).await {
            Ok(zone) => zone,
            Err(e) => {
                warn!(worker_id, error = %e, "Budget zone check failed");
                return None;
            }
        };

        {
            let mut last = self.last_zone.lock().unwrap_or_else(|p| p.into_inner());
            let prev = last.insert(worker_id, zone);
            if let Some(prev) = prev {
                if zone <= prev {
                    return None;
                }
            }
        }

        let message = match zone {
            BudgetZone::Green => return None,
            BudgetZone::Yellow => format!(
                "⚠️ Worker {worker_id} token budget at YELLOW (60%+). Compressing context."
            ),
            BudgetZone::Orange => format!(
                "🟠 Worker {worker_id} token budget at ORANGE (80%+). Reducing context heavily."
            ),
            BudgetZone::Red => format!(
                "🔴 Worker {worker_id} token budget at RED (90%+). Running minimum context only!"
            ),
        };
        self.notify.send_direct(&message);
        Some(zone)
    }

    /// Append one immutable usage ledger row for today.
    pub async fn record_usage(
        &self,
        worker_id: Option<i64>,
        project_id: Option<i64>,
        task_id: Option<i64>,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<(), StorageError> {
        self.db
            .record_usage(
                worker_id,
                project_id,
                task_id,
                input_tokens,
                output_tokens,
                &today(),
            )
            .await
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn governor_with_limit(daily_limit: i64) -> (Governor, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.set_budget(&TokenBudget {
            worker_id: 1,
            daily_limit,
            ..TokenBudget::default()
        })
        .await
        .unwrap();
        let notify = Arc::new(Dispatcher::disabled());
        (Governor::new(Arc::clone(&db), notify), db)
    }

    async fn burn(gov: &Governor, tokens: i64) {
        gov.record_usage(Some(1), None, None, tokens, 0).await.unwrap();
    }

    #[tokio::test]
    async fn zone_boundaries_are_inclusive() {
        let (gov, _db) = governor_with_limit(1000).await;

        burn(&gov, 599).await;
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Green);

        burn(&gov, 1).await; // exactly 60%
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Yellow);

        burn(&gov, 199).await; // 79.9%
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Yellow);

        burn(&gov, 1).await; // exactly 80%
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Orange);

        burn(&gov, 100).await; // exactly 90%
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Red);
    }

    #[tokio::test]
    async fn unconfigured_worker_uses_default_limit() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gov = Governor::new(Arc::clone(&db), Arc::new(Dispatcher::disabled()));

        assert_eq!(gov.budget_zone(42).await.unwrap(), BudgetZone::Green);

        gov.record_usage(Some(42), None, None, 600_000, 0).await.unwrap();
        assert_eq!(gov.budget_zone(42).await.unwrap(), BudgetZone::Yellow);
    }

    #[tokio::test]
    async fn alerts_fire_only_on_escalation() {
        let (gov, _db) = governor_with_limit(1000).await;

        // Green — nothing to report.
        assert_eq!(gov.check_budget(1).await, None);

        // Green → Yellow escalates.
        burn(&gov, 600).await;
        assert_eq!(gov.check_budget(1).await, Some(BudgetZone::Yellow));

        // Repeated check in the same zone stays quiet.
        assert_eq!(gov.check_budget(1).await, None);

        // Yellow → Red escalates (skipping Orange is still an escalation).
        burn(&gov, 350).await;
        assert_eq!(gov.check_budget(1).await, Some(BudgetZone::Red));
    }

    #[tokio::test]
    async fn de_escalation_never_alerts() {
        let (gov, _db) = governor_with_limit(1000).await;

        burn(&gov, 950).await;
        assert_eq!(gov.check_budget(1).await, Some(BudgetZone::Red));

        // Simulate a day rollover by raising the limit: usage pct drops.
        _db.set_budget(&TokenBudget {
            worker_id: 1,
            daily_limit: 10_000,
            ..TokenBudget::default()
        })
        .await
        .unwrap();

        // Red → Green is a de-escalation; no alert.
        assert_eq!(gov.check_budget(1).await, None);

        // Climbing back up to Yellow from the recorded Green re-alerts.
        burn(&gov, 5_500).await;
        assert_eq!(gov.check_budget(1).await, Some(BudgetZone::Yellow));
    }

    #[tokio::test]
    async fn zero_limit_disables_budgeting() {
        let (gov, _db) = governor_with_limit(0).await;
        burn(&gov, 1_000_000).await;
        assert_eq!(gov.budget_zone(1).await.unwrap(), BudgetZone::Green);
    }
}
