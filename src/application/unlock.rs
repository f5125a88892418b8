use super::gateway::PaymentGatewayAdapter;
use crate::domain::ledger::{Amount, EntryMetadata, LedgerEntry, NewLedgerEntry, Target};
use crate::domain::payment::{IntentMetadata, IntentStatus, IntentVerification};
use crate::domain::ports::LedgerStoreRef;
use crate::error::{Result, UnlockError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// The only writer of the ledger.
///
/// Turns a verified payment into exactly one ledger entry. Every call may be
/// repeated with the same reference, concurrently or later, and yields the
/// same entry.
pub struct UnlockEngine {
    store: LedgerStoreRef,
    gateway: Arc<PaymentGatewayAdapter>,
    verify_timeout: Duration,
}

impl UnlockEngine {
    pub fn new(store: LedgerStoreRef, gateway: Arc<PaymentGatewayAdapter>) -> Self {
        Self {
            store,
            gateway,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Records the grant paid for by `payment_reference`.
    ///
    /// # Errors
    ///
    /// * `PaymentNotConfirmed` if the provider doesn't report the payment as
    ///   succeeded within the verification timeout. Nothing is written.
    /// * `PaymentMismatch` if the payment was made for another subject or target.
    /// * `StoreUnavailable` if the ledger write fails. The payment is confirmed,
    ///   so the caller must retry with the same reference.
    pub async fn grant(
        &self,
        subject_id: &str,
        target: &Target,
        payment_reference: &str,
    ) -> Result<LedgerEntry> {
        let verification = self
            .bounded(payment_reference, self.gateway.verify_intent(payment_reference))
            .await?;
        if verification.status != IntentStatus::Succeeded {
            info!(
                reference = payment_reference,
                status = %verification.status,
                "payment not confirmed yet"
            );
            return Err(UnlockError::PaymentNotConfirmed {
                reference: payment_reference.to_string(),
                status: verification.status,
            });
        }
        check_payment_covers(&verification, subject_id, target)?;

        // Entries are keyed on the provider's id, so aliases of one intent
        // collapse onto one grant
        let payment_reference = verification.intent_id.as_str();
        let amount = Amount::new(verification.amount).map_err(|_| UnlockError::PaymentMismatch {
            reference: payment_reference.to_string(),
            reason: "provider reports a zero amount".to_string(),
        })?;
        let metadata = verification
            .metadata_ref
            .as_ref()
            .and_then(|meta| demand_metadata(meta, payment_reference));

        let entry = NewLedgerEntry::unlock(subject_id, target.clone(), payment_reference, amount, metadata);
        match self.store.insert(entry).await {
            Ok(entry) => {
                info!(
                    entry_id = %entry.id,
                    subject = subject_id,
                    target = %target,
                    reference = payment_reference,
                    "grant recorded"
                );
                Ok(entry)
            }
            Err(UnlockError::LedgerConflict(reference)) => {
                let existing = self.existing(&reference).await?;
                if !existing.is_unlock() || existing.subject_id != subject_id || existing.target != *target {
                    return Err(UnlockError::PaymentMismatch {
                        reference,
                        reason: format!(
                            "already recorded for {} on {}",
                            existing.subject_id, existing.target
                        ),
                    });
                }
                info!(entry_id = %existing.id, reference = %reference, "duplicate confirmation absorbed");
                Ok(existing)
            }
            Err(err) => {
                error!(
                    subject = subject_id,
                    target = %target,
                    reference = payment_reference,
                    error = %err,
                    "payment confirmed but grant not recorded; retry with the same reference"
                );
                Err(err)
            }
        }
    }

    /// Appends a compensating entry for a provider refund of an unlock.
    ///
    /// The original grant is left in place.
    pub async fn record_refund(
        &self,
        payment_reference: &str,
        refund_reference: &str,
    ) -> Result<LedgerEntry> {
        let refund = self
            .bounded(refund_reference, self.gateway.verify_refund(refund_reference))
            .await?;
        if refund.status != IntentStatus::Succeeded {
            return Err(UnlockError::PaymentNotConfirmed {
                reference: refund_reference.to_string(),
                status: refund.status,
            });
        }
        let refund_reference = refund.refund_id.as_str();
        if refund.payment_reference != payment_reference {
            return Err(UnlockError::PaymentMismatch {
                reference: refund_reference.to_string(),
                reason: format!("refund belongs to payment '{}'", refund.payment_reference),
            });
        }

        let original = self
            .store
            .get_by_reference(payment_reference)
            .await?
            .filter(LedgerEntry::is_unlock)
            .ok_or_else(|| {
                UnlockError::ValidationError(format!("No unlock recorded for payment {payment_reference}"))
            })?;
        let amount = Amount::new(refund.amount)?;

        match self
            .store
            .insert(NewLedgerEntry::refund(&original, refund_reference, amount))
            .await
        {
            Ok(entry) => {
                info!(entry_id = %entry.id, compensates = %original.id, "refund recorded");
                Ok(entry)
            }
            Err(UnlockError::LedgerConflict(reference)) => {
                let existing = self.existing(&reference).await?;
                if existing.compensates != Some(original.id) {
                    return Err(UnlockError::PaymentMismatch {
                        reference,
                        reason: "reference already used by another ledger entry".to_string(),
                    });
                }
                Ok(existing)
            }
            Err(err) => {
                error!(
                    reference = payment_reference,
                    refund = refund_reference,
                    error = %err,
                    "refund confirmed but not recorded"
                );
                Err(err)
            }
        }
    }

    async fn existing(&self, reference: &str) -> Result<LedgerEntry> {
        self.store
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| UnlockError::store(format!("conflicting entry for {reference} vanished")))
    }

    /// Runs a provider lookup under the verification timeout. A timeout means
    /// "not confirmed yet", never "failed".
    async fn bounded<T>(&self, reference: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.verify_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    reference,
                    timeout_ms = self.verify_timeout.as_millis() as u64,
                    "payment verification timed out"
                );
                Err(UnlockError::PaymentNotConfirmed {
                    reference: reference.to_string(),
                    status: IntentStatus::Pending,
                })
            }
        }
    }
}

/// Tag and score for the ledger entry. The payment is already confirmed, so
/// an out-of-range score is dropped (neutral weight) instead of failing the grant.
fn demand_metadata(meta: &IntentMetadata, reference: &str) -> Option<EntryMetadata> {
    match meta.entry_metadata() {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(reference, error = %err, "dropping invalid demand score");
            EntryMetadata::new(meta.tag.clone(), None).ok()
        }
    }
}

fn check_payment_covers(
    verification: &IntentVerification,
    subject_id: &str,
    target: &Target,
) -> Result<()> {
    let Some(meta) = &verification.metadata_ref else {
        return Ok(());
    };
    let reason = if meta.subject_id != subject_id {
        format!("paid by {}", meta.subject_id)
    } else if meta.target != *target {
        format!("paid for {}", meta.target)
    } else if !meta.kind.covers(target) {
        format!("a {} payment cannot unlock {target}", meta.kind)
    } else {
        return Ok(());
    };
    Err(UnlockError::PaymentMismatch {
        reference: verification.intent_id.clone(),
        reason,
    })
}
