use super::access::AccessQueryService;
use super::gateway::{PaymentGatewayAdapter, UnlockRequest};
use super::ranking::RankingEngine;
use super::unlock::UnlockEngine;
use crate::domain::demand::{LeaderboardRow, TargetStats};
use crate::domain::ledger::{DemandWindow, LedgerEntry, Target};
use crate::domain::payment::{IntentStatus, PaymentIntent};
use crate::domain::ports::{ClockRef, LedgerStoreRef, OnboardingGateRef};
use crate::error::{Result, UnlockError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Result of a confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Granted(LedgerEntry),
    /// The provider hasn't confirmed the payment; nothing was recorded.
    Pending(IntentStatus),
}

/// Exponential backoff for confirmations that hit retryable errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// The API surface of the unlock subsystem.
///
/// Stateless beyond its collaborators: every method may be called
/// concurrently with any other.
pub struct Marketplace {
    gateway: Arc<PaymentGatewayAdapter>,
    engine: UnlockEngine,
    access: AccessQueryService,
    ranking: RankingEngine,
    onboarding: OnboardingGateRef,
}

impl Marketplace {
    pub fn new(
        store: LedgerStoreRef,
        gateway: PaymentGatewayAdapter,
        onboarding: OnboardingGateRef,
        clock: ClockRef,
    ) -> Self {
        let gateway = Arc::new(gateway);
        Self {
            engine: UnlockEngine::new(store.clone(), gateway.clone()),
            access: AccessQueryService::new(store.clone(), clock.clone()),
            ranking: RankingEngine::new(store, clock),
            gateway,
            onboarding,
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_verify_timeout(timeout);
        self
    }

    /// Opens a payment intent for an unlock. The subject must have finished
    /// onboarding.
    pub async fn create_unlock_intent(&self, request: &UnlockRequest) -> Result<PaymentIntent> {
        let stage = self.onboarding.stage(&request.subject_id).await?;
        if !stage.is_active() {
            return Err(UnlockError::OnboardingIncomplete {
                subject: request.subject_id.clone(),
                stage,
            });
        }
        self.gateway.create_intent(request).await
    }

    pub async fn confirm_unlock(
        &self,
        subject_id: &str,
        target: &Target,
        payment_reference: &str,
    ) -> Result<ConfirmOutcome> {
        match self.engine.grant(subject_id, target, payment_reference).await {
            Ok(entry) => Ok(ConfirmOutcome::Granted(entry)),
            Err(UnlockError::PaymentNotConfirmed { status, .. }) => Ok(ConfirmOutcome::Pending(status)),
            Err(err) => Err(err),
        }
    }

    /// Like [`Marketplace::grant`], retrying retryable failures with backoff.
    /// Returns the last error once attempts run out.
    ///
    /// A payment that is still unconfirmed after the last attempt comes back
    /// as `Err(PaymentNotConfirmed)`, not mapped to
    /// [`ConfirmOutcome::Pending`] as [`Marketplace::confirm_unlock`] does.
    pub async fn confirm_with_retry(
        &self,
        subject_id: &str,
        target: &Target,
        payment_reference: &str,
        policy: RetryPolicy,
    ) -> Result<LedgerEntry> {
        let mut attempt = 1;
        loop {
            match self.engine.grant(subject_id, target, payment_reference).await {
                Ok(entry) => return Ok(entry),
                Err(err) if err.is_retryable() && attempt < policy.attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        reference = payment_reference,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "confirmation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn grant(
        &self,
        subject_id: &str,
        target: &Target,
        payment_reference: &str,
    ) -> Result<LedgerEntry> {
        self.engine.grant(subject_id, target, payment_reference).await
    }

    pub async fn refund(&self, payment_reference: &str, refund_reference: &str) -> Result<LedgerEntry> {
        self.engine
            .record_refund(payment_reference, refund_reference)
            .await
    }

    pub async fn access(&self, subject_id: &str, target: &Target) -> Result<bool> {
        self.access.has_grant(subject_id, target).await
    }

    pub async fn target_stats(&self, target: &Target, window: DemandWindow) -> Result<TargetStats> {
        self.access.stats_for(target, window).await
    }

    pub async fn leaderboard(&self, n: usize, window: DemandWindow) -> Result<Vec<LeaderboardRow>> {
        self.ranking.top_n(n, window).await
    }

    pub async fn rank_of(&self, target: &Target, window: DemandWindow) -> Result<Option<u32>> {
        self.ranking.position_of(target, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(700));
        assert_eq!(policy.backoff(40), Duration::from_millis(700));
    }
}
