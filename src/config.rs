//! Runtime configuration, read from flags with environment fallbacks.

use crate::domain::payment::Pricing;
use crate::error::{Result, UnlockError};
use crate::infrastructure::gateway::GatewayConfig;
use crate::infrastructure::gateway::http::{DEFAULT_CURRENCY, DEFAULT_PROVIDER_URL};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Payment provider API base URL
    #[arg(long, env = "PAYMENT_PROVIDER_URL", default_value = DEFAULT_PROVIDER_URL)]
    pub provider_url: String,

    /// Payment provider secret key (sk_... or rk_...)
    #[arg(long, env = "PAYMENT_PROVIDER_SECRET_KEY", hide_env_values = true)]
    pub provider_secret_key: Option<String>,

    /// ISO 4217 currency for new payment intents
    #[arg(long, env = "PAYMENT_CURRENCY", default_value = DEFAULT_CURRENCY)]
    pub currency: String,

    /// Upper bound on a single payment verification, in milliseconds
    #[arg(long, env = "VERIFY_TIMEOUT_MS", default_value = "10000")]
    pub verify_timeout_ms: u64,

    /// TOML price list for investor unlocks
    #[arg(long, env = "PRICING_FILE")]
    pub pricing: Option<PathBuf>,
}

impl ProviderArgs {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Validates provider credentials. Fails with `ConfigurationError`.
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        Ok(GatewayConfig::new(
            self.provider_url.clone(),
            self.provider_secret_key.clone(),
            self.currency.clone(),
        )?
        .with_request_timeout(self.verify_timeout()))
    }

    pub fn pricing(&self) -> Result<Pricing> {
        match &self.pricing {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    UnlockError::ConfigurationError(format!(
                        "Cannot read pricing file {}: {e}",
                        path.display()
                    ))
                })?;
                Pricing::from_toml(&raw)
            }
            None => Ok(Pricing::default()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Path to persistent ledger database (optional). If provided, uses RocksDB.
    #[arg(long, env = "LEDGER_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,
}
