//! Periodic best-effort state snapshots.
//!
//! Every tick, the exported state of each running exportable service is
//! written to the state store. Failures are logged and counted; they never
//! reach the lifecycle or dispatch paths.
//!
//! A cycle holds the registry read lock until its last write lands. Routing
//! is unaffected; lifecycle mutations wait for the cycle to finish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Kernel;

/// Outcome of one snapshot cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub saved: usize,
    pub failed: usize,
}

/// Cumulative snapshot statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Completed cycles
    pub cycles: u64,
    /// Blobs written across all cycles
    pub saved: u64,
    /// Failed writes across all cycles
    pub failed: u64,
    /// When the last cycle completed
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Kernel {
    /// Run one snapshot cycle now. A kernel without a store does nothing.
    pub async fn snapshot_now(&self) -> SnapshotReport {
        let Some(store) = &self.store else {
            return SnapshotReport::default();
        };

        // Export and write under one read lock: a stop_service persisting
        // final state needs the write lock, so it always lands after us.
        let mut report = SnapshotReport::default();
        {
            let registry = self.registry.read().await;
            for (name, state) in registry.export_running() {
                match store.save(&name, &state).await {
                    Ok(()) => report.saved += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(service = %name, error = %e, "snapshot_save_failed");
                    }
                }
            }
        }

        let mut stats = self.snapshots.lock().await;
        stats.cycles += 1;
        stats.saved += report.saved as u64;
        stats.failed += report.failed as u64;
        stats.last_completed_at = Some(Utc::now());

        tracing::debug!(
            "snapshot_cycle_completed: saved={}, failed={}",
            report.saved,
            report.failed
        );
        report
    }

    /// Snapshot every `period` until `cancel` fires. The first snapshot is
    /// taken one period after start.
    pub(crate) async fn snapshot_loop(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately once
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("snapshot_task_stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.snapshot_now().await;
                }
            }
        }
    }
}
