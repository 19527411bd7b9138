use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReconcileSchedule, Reconciler};

/// Main reconciliation loop.
///
/// Sleeps until the next cron tick, runs one pass, repeats. The pass is
/// awaited inline, so ticks of this loop never overlap; a tick that comes due
/// while a slow pass is still running is simply skipped. Runs until `cancel`
/// fires; an in-flight pass is allowed to finish.
pub async fn run_reconcile_loop(reconciler: Reconciler, schedule: ReconcileSchedule, cancel: CancellationToken) {
    info!(schedule = %schedule.expr(), "Reconciliation loop started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(schedule = %schedule.expr(), "Schedule has no upcoming ticks; stopping");
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next_run = %next, "Waiting for next reconciliation tick");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Reconciliation loop stopping");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                reconciler.reconcile_once().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use crate::executions::{ExecutionStatus, ExecutionStore, NewExecution};
    use crate::reconcile::tests::FakeRunner;
    use crate::storage::open_memory_pool;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_reconciles_on_tick_and_stops_on_cancel() {
        let store = ExecutionStore::new(open_memory_pool().unwrap());
        store
            .insert(NewExecution {
                execution_id: "L1".to_string(),
                ..Default::default()
            })
            .unwrap();
        let runner = Arc::new(FakeRunner::with(&[("L1", json!({"status": "succeeded"}))]));
        let reconciler = Reconciler::new(store.clone(), runner, &ReconcileConfig::default());
        let schedule = ReconcileSchedule::parse("* * * * * *").unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_reconcile_loop(reconciler, schedule, cancel.clone()));

        let mut status = ExecutionStatus::Running;
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            status = store.find("L1").unwrap().unwrap().status;
            if status == ExecutionStatus::Succeeded {
                break;
            }
        }
        assert_eq!(status, ExecutionStatus::Succeeded);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_first_tick() {
        let store = ExecutionStore::new(open_memory_pool().unwrap());
        let runner = Arc::new(FakeRunner::default());
        let reconciler = Reconciler::new(store, runner.clone(), &ReconcileConfig::default());
        let schedule = ReconcileSchedule::parse("0 0 1 1 *").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_reconcile_loop(reconciler, schedule, cancel).await;
        assert_eq!(runner.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
