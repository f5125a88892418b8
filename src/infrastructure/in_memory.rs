use crate::domain::ledger::{EntryId, LedgerEntry, NewLedgerEntry, Target};
use crate::domain::onboarding::OnboardingStage;
use crate::domain::ports::{ClockRef, LedgerStore, OnboardingGate};
use crate::error::{Result, UnlockError};
use crate::infrastructure::clock::SystemClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    entries: Vec<LedgerEntry>,
    by_reference: HashMap<String, usize>,
    grants: HashSet<(String, Target)>,
}

/// A thread-safe in-memory ledger.
///
/// Uniqueness check, id assignment and append all happen under one write lock,
/// so concurrent inserts of the same payment reference serialize into one
/// winner and conflicts.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    ledger: Arc<RwLock<Ledger>>,
    clock: ClockRef,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty ledger stamped with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: ClockRef) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::default())),
            clock,
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;
        if ledger.by_reference.contains_key(&entry.payment_reference) {
            return Err(UnlockError::LedgerConflict(entry.payment_reference));
        }

        let idx = ledger.entries.len();
        let entry = entry.into_entry(EntryId(idx as u64 + 1), self.clock.now());
        ledger
            .by_reference
            .insert(entry.payment_reference.clone(), idx);
        if entry.is_unlock() {
            ledger
                .grants
                .insert((entry.subject_id.clone(), entry.target.clone()));
        }
        ledger.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_by_reference(&self, payment_reference: &str) -> Result<Option<LedgerEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_reference
            .get(payment_reference)
            .map(|&idx| ledger.entries[idx].clone()))
    }

    async fn has_unlock(&self, subject_id: &str, target: &Target) -> Result<bool> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .grants
            .contains(&(subject_id.to_string(), target.clone())))
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .entries
            .iter()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.ledger.read().await.entries.len())
    }
}

/// Onboarding stages held in memory. Subjects without a recorded stage get
/// `fallback`.
#[derive(Clone)]
pub struct StaticOnboardingGate {
    stages: Arc<RwLock<HashMap<String, OnboardingStage>>>,
    fallback: OnboardingStage,
}

impl StaticOnboardingGate {
    pub fn new(fallback: OnboardingStage) -> Self {
        Self {
            stages: Arc::new(RwLock::new(HashMap::new())),
            fallback,
        }
    }

    /// A gate that treats every subject as fully onboarded.
    pub fn all_active() -> Self {
        Self::new(OnboardingStage::Active)
    }

    pub async fn set_stage(&self, subject_id: impl Into<String>, stage: OnboardingStage) {
        self.stages.write().await.insert(subject_id.into(), stage);
    }
}

#[async_trait]
impl OnboardingGate for StaticOnboardingGate {
    async fn stage(&self, subject_id: &str) -> Result<OnboardingStage> {
        let stages = self.stages.read().await;
        Ok(stages.get(subject_id).copied().unwrap_or(self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::{Amount, EntryKind};
    use crate::infrastructure::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn unlock(subject: &str, target: Target, reference: &str) -> NewLedgerEntry {
        NewLedgerEntry::unlock(subject, target, reference, Amount::new(4900).unwrap(), None)
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_in_order() {
        let store = InMemoryLedgerStore::new();
        let first = store
            .insert(unlock("S1", Target::platform_investor("1"), "pay_1"))
            .await
            .unwrap();
        let second = store
            .insert(unlock("S2", Target::platform_investor("1"), "pay_2"))
            .await
            .unwrap();
        assert_eq!(first.id, EntryId(1));
        assert_eq!(second.id, EntryId(2));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_reference_conflicts() {
        let store = InMemoryLedgerStore::new();
        let target = Target::platform_investor("42");
        store.insert(unlock("S1", target.clone(), "pay_abc")).await.unwrap();

        let result = store.insert(unlock("S9", target, "pay_abc")).await;
        assert!(matches!(result, Err(UnlockError::LedgerConflict(r)) if r == "pay_abc"));
        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get_by_reference("pay_abc").await.unwrap().unwrap();
        assert_eq!(stored.subject_id, "S1");
    }

    #[tokio::test]
    async fn test_grant_index_distinguishes_sources() {
        let store = InMemoryLedgerStore::new();
        store
            .insert(unlock("S1", Target::platform_investor("42"), "pay_1"))
            .await
            .unwrap();
        assert!(store.has_unlock("S1", &Target::platform_investor("42")).await.unwrap());
        assert!(!store.has_unlock("S1", &Target::directory_investor("42")).await.unwrap());
        assert!(!store.has_unlock("S2", &Target::platform_investor("42")).await.unwrap());
    }

    #[tokio::test]
    async fn test_refund_entries_keep_original_grant() {
        let store = InMemoryLedgerStore::new();
        let original = store
            .insert(unlock("S1", Target::platform_investor("42"), "pay_1"))
            .await
            .unwrap();
        let refund = NewLedgerEntry::refund(&original, "re_1", Amount::new(4900).unwrap());
        let refund = store.insert(refund).await.unwrap();
        assert_eq!(refund.kind, EntryKind::Refund);
        assert_eq!(refund.compensates, Some(original.id));
        assert!(store.has_unlock("S1", &Target::platform_investor("42")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_entries_since_uses_clock() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::at(start);
        let store = InMemoryLedgerStore::with_clock(Arc::new(clock.clone()));

        store.insert(unlock("S1", Target::project("p1"), "pay_1")).await.unwrap();
        clock.advance(Duration::days(10));
        store.insert(unlock("S2", Target::project("p2"), "pay_2")).await.unwrap();

        let recent = store.entries_since(start + Duration::days(5)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].payment_reference, "pay_2");
        assert_eq!(store.entries_since(start).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_static_gate_fallback() {
        let gate = StaticOnboardingGate::new(OnboardingStage::NeedsProfile);
        gate.set_stage("S1", OnboardingStage::Active).await;
        assert_eq!(gate.stage("S1").await.unwrap(), OnboardingStage::Active);
        assert_eq!(gate.stage("S2").await.unwrap(), OnboardingStage::NeedsProfile);
    }
}
