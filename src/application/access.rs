use crate::domain::demand::{DemandTally, TargetStats, in_window};
use crate::domain::ledger::{DemandWindow, Target};
use crate::domain::ports::{ClockRef, LedgerStoreRef};
use crate::error::Result;

/// Read-only answers about grants and per-target demand.
///
/// Reads go straight to the ledger, so a grant is visible as soon as its
/// insert has committed.
pub struct AccessQueryService {
    store: LedgerStoreRef,
    clock: ClockRef,
}

impl AccessQueryService {
    pub fn new(store: LedgerStoreRef, clock: ClockRef) -> Self {
        Self { store, clock }
    }

    pub async fn has_grant(&self, subject_id: &str, target: &Target) -> Result<bool> {
        self.store.has_unlock(subject_id, target).await
    }

    /// Demand for `target` over the trailing window, across all subjects.
    pub async fn stats_for(&self, target: &Target, window: DemandWindow) -> Result<TargetStats> {
        let now = self.clock.now();
        let entries = self.store.entries_since(window.start(now)).await?;

        let mut tally = DemandTally::default();
        for entry in in_window(&entries, now, window).filter(|e| e.target == *target) {
            tally.record(entry);
        }
        Ok(TargetStats::from_tally(&tally))
    }
}
