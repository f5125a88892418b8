use super::ledger::{LedgerEntry, NewLedgerEntry, Target};
use super::onboarding::OnboardingStage;
use super::payment::{IntentRequest, IntentVerification, PaymentIntent, RefundVerification};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Append-only ledger persistence.
///
/// `insert` is the only write and must be atomic with respect to the
/// payment-reference uniqueness check: of any number of concurrent inserts
/// sharing a reference, exactly one succeeds and the rest fail with
/// `UnlockError::LedgerConflict`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, entry: NewLedgerEntry) -> Result<LedgerEntry>;
    async fn get_by_reference(&self, payment_reference: &str) -> Result<Option<LedgerEntry>>;
    /// Whether an unlock entry exists for `(subject_id, target)`.
    async fn has_unlock(&self, subject_id: &str, target: &Target) -> Result<bool>;
    /// All entries created at or after `since`, in id order.
    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<LedgerEntry>>;
    async fn count(&self) -> Result<usize>;
}

/// Low-level payment provider calls.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentVerification>;
    async fn retrieve_refund(&self, refund_id: &str) -> Result<RefundVerification>;
}

#[async_trait]
pub trait OnboardingGate: Send + Sync {
    async fn stage(&self, subject_id: &str) -> Result<OnboardingStage>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentProviderRef = Arc<dyn PaymentProvider>;
pub type OnboardingGateRef = Arc<dyn OnboardingGate>;
pub type ClockRef = Arc<dyn Clock>;
