use crate::domain::ledger::{Target, TargetType};
use crate::domain::payment::{
    IntentMetadata, IntentRequest, IntentVerification, PaymentIntent, Pricing,
    RefundVerification, UnlockKind, idempotency_key,
};
use crate::domain::ports::PaymentProviderRef;
use crate::error::{Result, UnlockError};
use rust_decimal::Decimal;
use tracing::info;

/// What a subject wants to pay for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRequest {
    pub subject_id: String,
    pub kind: UnlockKind,
    /// Required for investor unlocks. Project visibility defaults to the
    /// subject's own project.
    pub target: Option<Target>,
    pub tag: Option<String>,
    pub score: Option<Decimal>,
}

impl UnlockRequest {
    pub fn investor(subject_id: impl Into<String>, target: Target) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind: UnlockKind::InvestorUnlock,
            target: Some(target),
            tag: None,
            score: None,
        }
    }

    pub fn project_visibility(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind: UnlockKind::ProjectVisibility,
            target: None,
            tag: None,
            score: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_score(mut self, score: Decimal) -> Self {
        self.score = Some(score);
        self
    }

    fn resolve_target(&self) -> Result<Target> {
        let target = match (&self.target, self.kind) {
            (Some(target), _) => target.clone(),
            (None, UnlockKind::ProjectVisibility) => {
                Target::new(self.subject_id.clone(), TargetType::ProjectVisibility)
            }
            (None, UnlockKind::InvestorUnlock) => {
                return Err(UnlockError::ValidationError(
                    "Investor unlock requires a target investor".to_string(),
                ));
            }
        };
        if !self.kind.covers(&target) {
            return Err(UnlockError::ValidationError(format!(
                "A {} payment cannot unlock {target}",
                self.kind
            )));
        }
        Ok(target)
    }
}

/// Prices unlocks server-side and talks to the payment provider.
///
/// Holds no mutable state; both calls are pass-throughs to the provider.
pub struct PaymentGatewayAdapter {
    provider: PaymentProviderRef,
    pricing: Pricing,
    currency: String,
}

impl PaymentGatewayAdapter {
    pub fn new(provider: PaymentProviderRef, pricing: Pricing, currency: impl Into<String>) -> Self {
        Self {
            provider,
            pricing,
            currency: currency.into(),
        }
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    pub async fn create_intent(&self, request: &UnlockRequest) -> Result<PaymentIntent> {
        let target = request.resolve_target()?;
        let amount = self.pricing.price_for(request.kind, &target);
        let metadata = IntentMetadata {
            subject_id: request.subject_id.clone(),
            target: target.clone(),
            kind: request.kind,
            tag: request.tag.clone(),
            score: request.score,
        };
        // Reject bad tag/score here rather than at grant time
        metadata.entry_metadata()?;

        let intent = self
            .provider
            .create_intent(IntentRequest {
                amount,
                currency: self.currency.clone(),
                idempotency_key: idempotency_key(&request.subject_id, &target, request.kind),
                metadata,
            })
            .await?;
        info!(
            intent_id = %intent.intent_id,
            subject = %request.subject_id,
            target = %target,
            amount = amount.minor_units(),
            "payment intent created"
        );
        Ok(intent)
    }

    pub async fn verify_intent(&self, intent_id: &str) -> Result<IntentVerification> {
        self.provider.retrieve_intent(intent_id).await
    }

    pub async fn verify_refund(&self, refund_id: &str) -> Result<RefundVerification> {
        self.provider.retrieve_refund(refund_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Amount;
    use crate::domain::payment::{IntentStatus, PROJECT_VISIBILITY_PRICE};
    use crate::infrastructure::gateway::SandboxGateway;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn adapter(sandbox: &SandboxGateway) -> PaymentGatewayAdapter {
        let pricing = Pricing::default()
            .with_investor_price(Target::platform_investor("42"), Amount::new(9900).unwrap());
        PaymentGatewayAdapter::new(Arc::new(sandbox.clone()), pricing, "usd")
    }

    #[tokio::test]
    async fn test_amount_is_server_computed() {
        let sandbox = SandboxGateway::new();
        let gateway = adapter(&sandbox);

        let vip = gateway
            .create_intent(&UnlockRequest::investor("S1", Target::platform_investor("42")))
            .await
            .unwrap();
        assert_eq!(vip.amount.minor_units(), 9900);

        let project = gateway
            .create_intent(&UnlockRequest::project_visibility("S1"))
            .await
            .unwrap();
        assert_eq!(project.amount.minor_units(), PROJECT_VISIBILITY_PRICE);

        let verification = gateway.verify_intent(&project.intent_id).await.unwrap();
        assert_eq!(verification.status, IntentStatus::Pending);
        let metadata = verification.metadata_ref.unwrap();
        assert_eq!(metadata.target, Target::project("S1"));
    }

    #[tokio::test]
    async fn test_repeat_attempt_reuses_intent() {
        let sandbox = SandboxGateway::new();
        let gateway = adapter(&sandbox);
        let request = UnlockRequest::investor("S1", Target::directory_investor("7"));

        let first = gateway.create_intent(&request).await.unwrap();
        let second = gateway.create_intent(&request).await.unwrap();
        assert_eq!(first.intent_id, second.intent_id);
        assert_eq!(sandbox.intent_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_kind() {
        let gateway = adapter(&SandboxGateway::new());

        let missing_target = UnlockRequest {
            target: None,
            ..UnlockRequest::investor("S1", Target::platform_investor("1"))
        };
        assert!(matches!(
            gateway.create_intent(&missing_target).await,
            Err(UnlockError::ValidationError(_))
        ));

        let wrong_kind = UnlockRequest {
            target: Some(Target::platform_investor("1")),
            ..UnlockRequest::project_visibility("S1")
        };
        assert!(matches!(
            gateway.create_intent(&wrong_kind).await,
            Err(UnlockError::ValidationError(_))
        ));

        let bad_score = UnlockRequest::investor("S1", Target::platform_investor("1")).with_score(dec!(500));
        assert!(gateway.create_intent(&bad_score).await.is_err());
    }
}
