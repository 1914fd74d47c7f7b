//! Acceptance-window expiry and overdue detection

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use utoipa::ToSchema;
use uuid::Uuid;

use super::borrow::BorrowService;
use crate::{
    error::{AppError, AppResult},
    models::borrow::BorrowStatus,
};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub expired: usize,
    pub overdue: usize,
}

/// Spawns deadline timers and the periodic sweep; all stop on shutdown
#[derive(Clone)]
pub struct ExpiryScheduler {
    shutdown: watch::Receiver<bool>,
}

/// Owner side of the scheduler. Dropping it also stops every task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl ExpiryScheduler {
    pub fn new() -> (Self, SchedulerHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown: rx }, SchedulerHandle { shutdown: tx })
    }

    /// Run `job` once `deadline` has passed, unless shut down first
    pub fn schedule<F>(&self, deadline: DateTime<Utc>, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => job.await,
                _ = shutdown.changed() => {}
            }
        })
    }

    /// Sweep every `every`, starting one period from now
    pub fn spawn_sweeper(&self, borrow: BorrowService, every: Duration) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match borrow.sweep().await {
                            Ok(report) if report != SweepReport::default() => {
                                tracing::info!(
                                    expired = report.expired,
                                    overdue = report.overdue,
                                    "Sweep completed"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!("Sweep failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Sweeper stopped");
        })
    }
}

impl BorrowService {
    /// Expire every request past its window and flag every late loan
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();

        for id in self.store.due_for_expiry(now).await? {
            if idempotent(id, self.expire_at(id, now).await)? {
                report.expired += 1;
            }
        }

        for id in self.store.due_for_overdue(now).await? {
            if idempotent(id, self.mark_overdue_at(id, now).await)? {
                report.overdue += 1;
            }
        }

        Ok(report)
    }

    /// Arm a timer for every pending request, e.g. after a restart
    pub async fn rearm_timers(&self) -> AppResult<usize> {
        let pending = self.store.list_by_status(&[BorrowStatus::Pending]).await?;
        let mut armed = 0;
        for transaction in pending {
            if let Some(deadline) = transaction.acceptance_deadline {
                let service = self.clone();
                let id = transaction.id;
                self.scheduler
                    .schedule(deadline, async move { service.expire_due(id).await });
                armed += 1;
            }
        }
        Ok(armed)
    }

    /// Timer body: expire if still due, otherwise nothing to do
    pub(crate) async fn expire_due(&self, id: Uuid) {
        match idempotent(id, self.expire(id).await) {
            Ok(_) => {}
            Err(e) => tracing::warn!(transaction_id = %id, "Expiry timer failed: {}", e),
        }
    }
}

/// Map a guard miss to `Ok(false)`; someone else already moved the row on
fn idempotent<T>(id: Uuid, result: AppResult<T>) -> AppResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(AppError::TransactionNotFound(_)) => {
            tracing::debug!(transaction_id = %id, "Transaction no longer due, skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
