use crate::domain::ledger::Amount;
use crate::domain::payment::{
    IntentMetadata, IntentRequest, IntentStatus, IntentVerification, PaymentIntent,
    RefundVerification,
};
use crate::domain::ports::PaymentProvider;
use crate::error::{Result, UnlockError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.stripe.com";
pub const DEFAULT_CURRENCY: &str = "usd";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated credentials and endpoint for the hosted payment provider.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    secret_key: String,
    pub currency: String,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// Fails with `ConfigurationError` when the key is absent or not a secret
    /// (`sk_`) or restricted (`rk_`) key, or the URL is not http(s).
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        currency: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(UnlockError::ConfigurationError(format!(
                "Payment provider URL '{base_url}' must be http(s)"
            )));
        }

        let secret_key = secret_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                UnlockError::ConfigurationError("Payment provider secret key is not set".to_string())
            })?;
        if !(secret_key.starts_with("sk_") || secret_key.starts_with("rk_")) {
            return Err(UnlockError::ConfigurationError(
                "Payment provider secret key must start with sk_ or rk_".to_string(),
            ));
        }

        let currency = currency.into().to_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(UnlockError::ConfigurationError(format!(
                "Currency '{currency}' is not an ISO 4217 code"
            )));
        }

        Ok(Self {
            base_url,
            secret_key,
            currency,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: u64,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
    amount: u64,
    status: String,
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

fn intent_status(raw: &str) -> IntentStatus {
    match raw {
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Failed,
        // processing, requires_action, requires_payment_method, requires_capture...
        _ => IntentStatus::Pending,
    }
}

fn refund_status(raw: &str) -> IntentStatus {
    match raw {
        "succeeded" => IntentStatus::Succeeded,
        "failed" | "canceled" => IntentStatus::Failed,
        _ => IntentStatus::Pending,
    }
}

/// Payment provider reached over its REST API (Stripe wire format).
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    config: GatewayConfig,
}

impl HttpPaymentProvider {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UnlockError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.base_url, path)
    }

    /// Maps transport and HTTP failures for a lookup of `reference`.
    async fn read<T: DeserializeOwned>(
        &self,
        reference: &str,
        response: reqwest::Result<Response>,
    ) -> Result<T> {
        let response = response.map_err(|e| transport_error(reference, e))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| UnlockError::GatewayUnavailable(format!("Malformed provider response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error.message)
            .unwrap_or_else(|| status.to_string());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                UnlockError::ConfigurationError(format!("Provider rejected credentials: {message}")),
            ),
            StatusCode::NOT_FOUND => Err(UnlockError::PaymentNotConfirmed {
                reference: reference.to_string(),
                status: IntentStatus::Failed,
            }),
            StatusCode::BAD_REQUEST => Err(UnlockError::ValidationError(message)),
            _ => Err(UnlockError::GatewayUnavailable(format!("{status}: {message}"))),
        }
    }
}

/// Provider object ids (`pi_...`, `re_...`) are placed in the request path,
/// so anything that could change the path or add a query is refused.
fn object_id(reference: &str) -> Result<&str> {
    if !reference.is_empty() && reference.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(reference)
    } else {
        Err(UnlockError::ValidationError(format!(
            "'{reference}' is not a payment provider object id"
        )))
    }
}

fn transport_error(reference: &str, err: reqwest::Error) -> UnlockError {
    if err.is_timeout() {
        // A slow provider is not a failed payment
        UnlockError::PaymentNotConfirmed {
            reference: reference.to_string(),
            status: IntentStatus::Pending,
        }
    } else {
        UnlockError::GatewayUnavailable(err.to_string())
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent> {
        let mut form = vec![
            ("amount".to_string(), request.amount.minor_units().to_string()),
            ("currency".to_string(), request.currency.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in request.metadata.to_pairs() {
            form.push((format!("metadata[{key}]"), value));
        }

        debug!(idempotency_key = %request.idempotency_key, "creating payment intent");
        let response = self
            .client
            .post(self.url("payment_intents"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await;
        let body: IntentBody = self.read(&request.idempotency_key, response).await?;

        let client_secret = body.client_secret.ok_or_else(|| {
            UnlockError::GatewayUnavailable(format!("Intent {} has no client secret", body.id))
        })?;
        Ok(PaymentIntent {
            intent_id: body.id,
            client_secret,
            amount: Amount::new(body.amount)?,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentVerification> {
        let intent_id = object_id(intent_id)?;
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{intent_id}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await;
        let body: IntentBody = self.read(intent_id, response).await?;
        Ok(IntentVerification {
            intent_id: body.id,
            status: intent_status(&body.status),
            amount: body.amount,
            metadata_ref: IntentMetadata::from_pairs(&body.metadata),
        })
    }

    async fn retrieve_refund(&self, refund_id: &str) -> Result<RefundVerification> {
        let refund_id = object_id(refund_id)?;
        let response = self
            .client
            .get(self.url(&format!("refunds/{refund_id}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await;
        let body: RefundBody = self.read(refund_id, response).await?;
        Ok(RefundVerification {
            refund_id: body.id,
            status: refund_status(&body.status),
            amount: body.amount,
            payment_reference: body.payment_intent.unwrap_or_default(),
        })
    }
}
