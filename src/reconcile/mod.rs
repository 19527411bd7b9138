//! Execution reconciliation -- keeps local execution records eventually
//! consistent with the job runner.
//!
//! A pass selects every `running`/`unknown` record created inside the
//! lookback window, asks the runner for each one's current state (fanned out,
//! bounded by `max_in_flight`) and writes back whatever changed. Failures are
//! per record: they are logged, counted and retried on the next tick.

pub mod engine;
pub mod schedule;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::ReconcileConfig;
use crate::executions::{ExecutionRecord, ExecutionStatus, ExecutionStore, StoreError, Transition};
use crate::runner::{ExecutionInfo, JobRunner};

pub use self::engine::run_reconcile_loop;
pub use self::schedule::ReconcileSchedule;

/// What happened to one record during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "status")]
pub enum RecordOutcome {
    Updated(ExecutionStatus),
    Unchanged,
    /// Record was already terminal; the runner's answer was ignored.
    Terminal,
    /// No local record with that execution id.
    NotTracked,
    /// Status query or store write failed; retried next tick.
    Failed,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub pass_id: Uuid,
    pub candidates: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    fn new(pass_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            pass_id,
            candidates: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
            started_at,
            finished_at: started_at,
        }
    }

    fn tally(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Updated(_) => self.updated += 1,
            RecordOutcome::Unchanged => self.unchanged += 1,
            RecordOutcome::Terminal | RecordOutcome::NotTracked => self.skipped += 1,
            RecordOutcome::Failed => self.failed += 1,
        }
    }
}

/// Orchestrates the record store and the runner.
#[derive(Clone)]
pub struct Reconciler {
    store: ExecutionStore,
    runner: Arc<dyn JobRunner>,
    lookback: chrono::Duration,
    max_in_flight: usize,
}

impl Reconciler {
    pub fn new(store: ExecutionStore, runner: Arc<dyn JobRunner>, config: &ReconcileConfig) -> Self {
        Self {
            store,
            runner,
            lookback: chrono::Duration::days(i64::from(config.lookback_days)),
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    /// Run one best-effort pass over all in-flight records.
    ///
    /// Never fails: store and runner errors are logged and reflected in the
    /// report counters.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", %pass_id);
        self.run_pass(pass_id).instrument(span).await
    }

    async fn run_pass(&self, pass_id: Uuid) -> ReconcileReport {
        let started_at = Utc::now();
        let mut report = ReconcileReport::new(pass_id, started_at);

        let since = started_at - self.lookback;
        let candidates = match self.store.list_pending_reconciliation(since) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to load in-flight executions");
                report.finished_at = Utc::now();
                return report;
            }
        };

        report.candidates = candidates.len();
        info!(candidates = report.candidates, "Reconciliation pass started");

        let outcomes: Vec<RecordOutcome> = stream::iter(candidates)
            .map(|record| self.reconcile_candidate(record))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        for outcome in outcomes {
            report.tally(outcome);
        }
        report.finished_at = Utc::now();

        info!(
            candidates = report.candidates,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Reconciliation pass complete"
        );
        report
    }

    async fn reconcile_candidate(&self, record: ExecutionRecord) -> RecordOutcome {
        let execution_id = record.execution_id;
        let info = match self.runner.execution(&execution_id).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%execution_id, error = %e, "Status query failed; will retry next tick");
                return RecordOutcome::Failed;
            }
        };

        match self.apply_info(&execution_id, &info) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%execution_id, error = %e, "Failed to store reconciled execution");
                RecordOutcome::Failed
            }
        }
    }

    /// Fold a runner payload into the stored record for `execution_id`.
    ///
    /// The record is re-read here so concurrent administrative edits are not
    /// clobbered by a stale copy.
    pub fn apply_info(&self, execution_id: &str, info: &ExecutionInfo) -> Result<RecordOutcome, StoreError> {
        let Some(mut record) = self.store.find(execution_id)? else {
            debug!(%execution_id, "Execution not tracked locally; nothing to reconcile");
            return Ok(RecordOutcome::NotTracked);
        };

        let observation = info.observation();
        match record.apply_observation(&observation, Utc::now()) {
            Transition::AlreadyTerminal => {
                if observation.status != record.status {
                    warn!(
                        %execution_id,
                        stored = %record.status,
                        reported = %observation.status,
                        "Runner disagrees with terminal record; keeping stored status"
                    );
                }
                Ok(RecordOutcome::Terminal)
            }
            Transition::Unchanged => Ok(RecordOutcome::Unchanged),
            Transition::Updated { from, to } => {
                if self.store.save_reconciled(&record)? {
                    info!(%execution_id, %from, %to, "Execution updated");
                    Ok(RecordOutcome::Updated(to))
                } else {
                    // Another writer made it terminal (or removed it) since the read.
                    debug!(%execution_id, "Execution changed underneath reconciliation; skipped");
                    Ok(RecordOutcome::Terminal)
                }
            }
        }
    }
}
