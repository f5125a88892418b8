//! Pure demand aggregation over ledger entries.
//!
//! Nothing here holds state between calls: stats and leaderboards are always
//! recomputed from the entries handed in.

use super::ledger::{DemandWindow, EntryId, LedgerEntry, Target, TargetType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Running totals for one target.
#[derive(Debug, Clone, Default)]
pub struct DemandTally {
    count: usize,
    score_sum: Decimal,
    tags: BTreeMap<String, usize>,
    latest: Option<(DateTime<Utc>, EntryId)>,
}

impl DemandTally {
    pub fn record(&mut self, entry: &LedgerEntry) {
        self.count += 1;
        self.score_sum += entry.weight();
        if let Some(tag) = entry.tag() {
            *self.tags.entry(tag.to_string()).or_default() += 1;
        }
        let stamp = (entry.created_at, entry.id);
        if self.latest.is_none_or(|latest| stamp > latest) {
            self.latest = Some(stamp);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn avg_score(&self) -> Option<Decimal> {
        (self.count > 0).then(|| self.score_sum / Decimal::from(self.count))
    }

    /// Most frequent tag; ties go to the lexicographically smallest.
    pub fn top_tag(&self) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (tag, &n) in &self.tags {
            if best.is_none_or(|(_, m)| n > m) {
                best = Some((tag, n));
            }
        }
        best.map(|(tag, _)| tag)
    }

    fn latest(&self) -> Option<(DateTime<Utc>, EntryId)> {
        self.latest
    }
}

/// Unlock entries inside `window` as of `now`.
pub fn in_window<'a>(
    entries: &'a [LedgerEntry],
    now: DateTime<Utc>,
    window: DemandWindow,
) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
    entries
        .iter()
        .filter(move |e| e.is_unlock() && window.contains(now, e.created_at))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStats {
    pub total_requests: usize,
    pub top_tag: Option<String>,
    pub avg_score: Option<Decimal>,
}

impl TargetStats {
    pub fn from_tally(tally: &DemandTally) -> Self {
        Self {
            total_requests: tally.count(),
            top_tag: tally.top_tag().map(str::to_string),
            avg_score: tally.avg_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub position: u32,
    pub target_id: String,
    pub target_type: TargetType,
    pub request_count: usize,
    pub avg_score: Decimal,
}

impl LeaderboardRow {
    pub fn target(&self) -> Target {
        Target::new(self.target_id.clone(), self.target_type)
    }
}

/// Request count desc, average score desc, then the target whose most recent
/// request is older first. Entry ids are unique, so the order is total.
fn rank_order(a: &(Target, DemandTally), b: &(Target, DemandTally)) -> Ordering {
    b.1.count()
        .cmp(&a.1.count())
        .then_with(|| b.1.avg_score().cmp(&a.1.avg_score()))
        .then_with(|| a.1.latest().cmp(&b.1.latest()))
        .then_with(|| a.0.cmp(&b.0))
}

/// Ranks every investor target with at least one unlock in the window.
pub fn rank(entries: &[LedgerEntry], now: DateTime<Utc>, window: DemandWindow) -> Vec<LeaderboardRow> {
    let mut groups: HashMap<Target, DemandTally> = HashMap::new();
    for entry in in_window(entries, now, window).filter(|e| e.target.kind.is_investor()) {
        groups.entry(entry.target.clone()).or_default().record(entry);
    }

    let mut groups: Vec<(Target, DemandTally)> = groups.into_iter().collect();
    groups.sort_by(rank_order);

    groups
        .into_iter()
        .zip(1u32..)
        .map(|((target, tally), position)| LeaderboardRow {
            position,
            target_id: target.id,
            target_type: target.kind,
            request_count: tally.count(),
            avg_score: tally.avg_score().unwrap_or_default(),
        })
        .collect()
}
