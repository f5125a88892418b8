use crate::domain::onboarding::OnboardingStage;
use crate::domain::payment::IntentStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Payment {reference} not confirmed (status: {status})")]
    PaymentNotConfirmed {
        reference: String,
        status: IntentStatus,
    },
    #[error("Ledger already holds an entry for payment {0}")]
    LedgerConflict(String),
    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Payment {reference} does not cover this unlock: {reason}")]
    PaymentMismatch { reference: String, reason: String },
    #[error("Subject {subject} cannot unlock yet (onboarding stage: {stage})")]
    OnboardingIncomplete {
        subject: String,
        stage: OnboardingStage,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl UnlockError {
    /// Whether the same call may succeed later with identical arguments.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PaymentNotConfirmed { .. }
                | Self::StoreUnavailable(_)
                | Self::GatewayUnavailable(_)
        )
    }

    pub(crate) fn store<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::StoreUnavailable(err.into())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for UnlockError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StoreUnavailable(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, UnlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let pending = UnlockError::PaymentNotConfirmed {
            reference: "pay_1".to_string(),
            status: IntentStatus::Pending,
        };
        assert!(pending.is_retryable());
        assert!(UnlockError::store(std::io::Error::other("down")).is_retryable());
        assert!(!UnlockError::ConfigurationError("no key".to_string()).is_retryable());
        assert!(!UnlockError::LedgerConflict("pay_1".to_string()).is_retryable());
    }
}
