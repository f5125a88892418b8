use crate::domain::ledger::Amount;
use crate::domain::payment::{
    IntentMetadata, IntentRequest, IntentStatus, IntentVerification, PaymentIntent,
    RefundVerification,
};
use crate::domain::ports::PaymentProvider;
use crate::error::{Result, UnlockError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct SandboxIntent {
    amount: Amount,
    status: IntentStatus,
    metadata: Option<IntentMetadata>,
}

#[derive(Debug, Clone)]
struct SandboxRefund {
    intent_id: String,
    amount: u64,
    status: IntentStatus,
}

#[derive(Default)]
struct Provider {
    intents: HashMap<String, SandboxIntent>,
    by_idempotency_key: HashMap<String, String>,
    refunds: HashMap<String, SandboxRefund>,
    sequence: u64,
}

/// An in-process payment provider.
///
/// Intents start `pending` and only move when the test (or operator) settles
/// them, which makes delivery-order and retry scenarios reproducible.
/// Clones share state.
#[derive(Clone, Default)]
pub struct SandboxGateway {
    provider: Arc<RwLock<Provider>>,
    verify_delay: Option<Duration>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every retrieval, to exercise verification timeouts.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = Some(delay);
        self
    }

    /// Registers an intent created outside this process, e.g. from a webhook
    /// fixture.
    pub async fn register_intent(
        &self,
        intent_id: impl Into<String>,
        amount: Amount,
        status: IntentStatus,
        metadata: Option<IntentMetadata>,
    ) {
        let mut provider = self.provider.write().await;
        provider.intents.insert(
            intent_id.into(),
            SandboxIntent {
                amount,
                status,
                metadata,
            },
        );
    }

    pub async fn settle(&self, intent_id: &str, status: IntentStatus) -> Result<()> {
        let mut provider = self.provider.write().await;
        let intent = provider
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| UnlockError::ValidationError(format!("Unknown intent {intent_id}")))?;
        intent.status = status;
        Ok(())
    }

    /// Refunds a succeeded intent in full and returns the refund id.
    pub async fn refund(&self, intent_id: &str, status: IntentStatus) -> Result<String> {
        let mut provider = self.provider.write().await;
        let amount = match provider.intents.get(intent_id) {
            Some(intent) if intent.status == IntentStatus::Succeeded => intent.amount,
            Some(_) => {
                return Err(UnlockError::ValidationError(format!(
                    "Intent {intent_id} has not succeeded"
                )));
            }
            None => {
                return Err(UnlockError::ValidationError(format!(
                    "Unknown intent {intent_id}"
                )));
            }
        };
        provider.sequence += 1;
        let refund_id = format!("re_sandbox_{}", provider.sequence);
        provider.refunds.insert(
            refund_id.clone(),
            SandboxRefund {
                intent_id: intent_id.to_string(),
                amount: amount.minor_units(),
                status,
            },
        );
        Ok(refund_id)
    }

    pub async fn intent_count(&self) -> usize {
        self.provider.read().await.intents.len()
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.verify_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentProvider for SandboxGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent> {
        let mut provider = self.provider.write().await;

        let existing = provider
            .by_idempotency_key
            .get(&request.idempotency_key)
            .cloned();
        let intent_id = match existing {
            Some(existing) => existing,
            None => {
                provider.sequence += 1;
                let intent_id = format!("pi_sandbox_{}", provider.sequence);
                provider.intents.insert(
                    intent_id.clone(),
                    SandboxIntent {
                        amount: request.amount,
                        status: IntentStatus::Pending,
                        metadata: Some(request.metadata),
                    },
                );
                provider
                    .by_idempotency_key
                    .insert(request.idempotency_key, intent_id.clone());
                intent_id
            }
        };

        let amount = provider
            .intents
            .get(&intent_id)
            .map(|intent| intent.amount)
            .unwrap_or(request.amount);
        Ok(PaymentIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
            amount,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentVerification> {
        self.simulate_latency().await;
        let provider = self.provider.read().await;
        let intent = provider
            .intents
            .get(intent_id)
            .ok_or_else(|| UnlockError::PaymentNotConfirmed {
                reference: intent_id.to_string(),
                status: IntentStatus::Failed,
            })?;
        Ok(IntentVerification {
            intent_id: intent_id.to_string(),
            status: intent.status,
            amount: intent.amount.minor_units(),
            metadata_ref: intent.metadata.clone(),
        })
    }

    async fn retrieve_refund(&self, refund_id: &str) -> Result<RefundVerification> {
        self.simulate_latency().await;
        let provider = self.provider.read().await;
        let refund = provider
            .refunds
            .get(refund_id)
            .ok_or_else(|| UnlockError::PaymentNotConfirmed {
                reference: refund_id.to_string(),
                status: IntentStatus::Failed,
            })?;
        Ok(RefundVerification {
            refund_id: refund_id.to_string(),
            status: refund.status,
            amount: refund.amount,
            payment_reference: refund.intent_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Target;
    use crate::domain::payment::{UnlockKind, idempotency_key};

    fn request(subject: &str) -> IntentRequest {
        let target = Target::platform_investor("42");
        IntentRequest {
            amount: Amount::new(4900).unwrap(),
            currency: "usd".to_string(),
            idempotency_key: idempotency_key(subject, &target, UnlockKind::InvestorUnlock),
            metadata: IntentMetadata {
                subject_id: subject.to_string(),
                target,
                kind: UnlockKind::InvestorUnlock,
                tag: None,
                score: None,
            },
        }
    }

    #[tokio::test]
    async fn test_idempotent_intent_creation() {
        let sandbox = SandboxGateway::new();
        let first = sandbox.create_intent(request("S1")).await.unwrap();
        let again = sandbox.create_intent(request("S1")).await.unwrap();
        let other = sandbox.create_intent(request("S2")).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first.intent_id, other.intent_id);
        assert_eq!(sandbox.intent_count().await, 2);
    }

    #[tokio::test]
    async fn test_settle_changes_verification() {
        let sandbox = SandboxGateway::new();
        let intent = sandbox.create_intent(request("S1")).await.unwrap();

        let pending = sandbox.retrieve_intent(&intent.intent_id).await.unwrap();
        assert_eq!(pending.status, IntentStatus::Pending);

        sandbox
            .settle(&intent.intent_id, IntentStatus::Succeeded)
            .await
            .unwrap();
        let settled = sandbox.retrieve_intent(&intent.intent_id).await.unwrap();
        assert_eq!(settled.status, IntentStatus::Succeeded);
        assert_eq!(settled.amount, 4900);
        assert_eq!(settled.metadata_ref.unwrap().subject_id, "S1");
    }

    #[tokio::test]
    async fn test_refund_requires_succeeded_intent() {
        let sandbox = SandboxGateway::new();
        let intent = sandbox.create_intent(request("S1")).await.unwrap();
        assert!(
            sandbox
                .refund(&intent.intent_id, IntentStatus::Succeeded)
                .await
                .is_err()
        );

        sandbox
            .settle(&intent.intent_id, IntentStatus::Succeeded)
            .await
            .unwrap();
        let refund_id = sandbox
            .refund(&intent.intent_id, IntentStatus::Succeeded)
            .await
            .unwrap();
        let refund = sandbox.retrieve_refund(&refund_id).await.unwrap();
        assert_eq!(refund.payment_reference, intent.intent_id);
        assert_eq!(refund.amount, 4900);
    }

    #[tokio::test]
    async fn test_unknown_intent_is_not_confirmed() {
        let sandbox = SandboxGateway::new();
        assert!(matches!(
            sandbox.retrieve_intent("pi_missing").await,
            Err(UnlockError::PaymentNotConfirmed {
                status: IntentStatus::Failed,
                ..
            })
        ));
    }
}
