#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use unlock_ledger::application::gateway::PaymentGatewayAdapter;
use unlock_ledger::application::marketplace::Marketplace;
use unlock_ledger::domain::ledger::{Amount, Target};
use unlock_ledger::domain::payment::{IntentMetadata, IntentStatus, Pricing, UnlockKind};
use unlock_ledger::domain::ports::LedgerStoreRef;
use unlock_ledger::infrastructure::clock::ManualClock;
use unlock_ledger::infrastructure::gateway::SandboxGateway;
use unlock_ledger::infrastructure::in_memory::{InMemoryLedgerStore, StaticOnboardingGate};

pub const PRICE: u64 = 4900;

/// A marketplace wired to the sandbox provider, an in-memory ledger and a
/// manual clock, with handles to each.
pub struct Harness {
    pub sandbox: SandboxGateway,
    pub store: InMemoryLedgerStore,
    pub clock: ManualClock,
    pub onboarding: Arc<StaticOnboardingGate>,
    pub marketplace: Marketplace,
}

pub fn harness() -> Harness {
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    let store = InMemoryLedgerStore::with_clock(Arc::new(clock.clone()));
    harness_with_store(Arc::new(store.clone()), store, clock)
}

/// Like [`harness`], but the marketplace writes through `ledger` (e.g. a
/// wrapper around `store`).
pub fn harness_with_store(
    ledger: LedgerStoreRef,
    store: InMemoryLedgerStore,
    clock: ManualClock,
) -> Harness {
    let sandbox = SandboxGateway::new();
    let onboarding = Arc::new(StaticOnboardingGate::all_active());
    let gateway = PaymentGatewayAdapter::new(Arc::new(sandbox.clone()), Pricing::default(), "usd");
    let marketplace = Marketplace::new(
        ledger,
        gateway,
        onboarding.clone(),
        Arc::new(clock.clone()),
    );
    Harness {
        sandbox,
        store,
        clock,
        onboarding,
        marketplace,
    }
}

pub fn metadata(subject: &str, target: &Target, tag: Option<&str>, score: Option<Decimal>) -> IntentMetadata {
    let kind = if target.kind.is_investor() {
        UnlockKind::InvestorUnlock
    } else {
        UnlockKind::ProjectVisibility
    };
    IntentMetadata {
        subject_id: subject.to_string(),
        target: target.clone(),
        kind,
        tag: tag.map(str::to_string),
        score,
    }
}

/// Registers a settled payment at the provider.
pub async fn paid(h: &Harness, reference: &str, subject: &str, target: &Target) {
    paid_with(h, reference, subject, target, None, None).await;
}

pub async fn paid_with(
    h: &Harness,
    reference: &str,
    subject: &str,
    target: &Target,
    tag: Option<&str>,
    score: Option<Decimal>,
) {
    h.sandbox
        .register_intent(
            reference,
            Amount::new(PRICE).unwrap(),
            IntentStatus::Succeeded,
            Some(metadata(subject, target, tag, score)),
        )
        .await;
}
