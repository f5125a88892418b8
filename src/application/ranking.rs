use crate::domain::demand::{LeaderboardRow, rank};
use crate::domain::ledger::{DemandWindow, Target};
use crate::domain::ports::{ClockRef, LedgerStoreRef};
use crate::error::Result;

/// Investor demand leaderboard.
///
/// Every call re-reads the window from the ledger and ranks it from scratch;
/// there is no cached ranking to drift from the ledger. All rows of one call
/// come from the same read.
pub struct RankingEngine {
    store: LedgerStoreRef,
    clock: ClockRef,
}

impl RankingEngine {
    pub fn new(store: LedgerStoreRef, clock: ClockRef) -> Self {
        Self { store, clock }
    }

    pub async fn top_n(&self, n: usize, window: DemandWindow) -> Result<Vec<LeaderboardRow>> {
        let mut rows = self.leaderboard(window).await?;
        rows.truncate(n);
        Ok(rows)
    }

    /// 1-based rank of `target`, or `None` when it has no requests in the window.
    pub async fn position_of(&self, target: &Target, window: DemandWindow) -> Result<Option<u32>> {
        Ok(self
            .leaderboard(window)
            .await?
            .into_iter()
            .find(|row| row.target_id == target.id && row.target_type == target.kind)
            .map(|row| row.position))
    }

    async fn leaderboard(&self, window: DemandWindow) -> Result<Vec<LeaderboardRow>> {
        let now = self.clock.now();
        let entries = self.store.entries_since(window.start(now)).await?;
        Ok(rank(&entries, now, window))
    }
}
