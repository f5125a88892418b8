use super::ledger::{Amount, EntryMetadata, Target, TargetType};
use crate::error::UnlockError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Flat price of listing a project on the marketplace, in cents.
pub const PROJECT_VISIBILITY_PRICE: u64 = 4900;
/// Investor unlock price used when no per-target price is configured.
pub const DEFAULT_INVESTOR_PRICE: u64 = 4900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnlockKind {
    InvestorUnlock,
    ProjectVisibility,
}

impl UnlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvestorUnlock => "investor-unlock",
            Self::ProjectVisibility => "project-visibility",
        }
    }

    /// Whether `target` is something this kind of payment can unlock.
    pub fn covers(self, target: &Target) -> bool {
        match self {
            Self::InvestorUnlock => target.kind.is_investor(),
            Self::ProjectVisibility => target.kind == TargetType::ProjectVisibility,
        }
    }
}

impl fmt::Display for UnlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnlockKind {
    type Err = UnlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "investor-unlock" | "investor" => Ok(Self::InvestorUnlock),
            "project-visibility" | "project" => Ok(Self::ProjectVisibility),
            other => Err(UnlockError::ValidationError(format!(
                "Unknown unlock kind '{other}'"
            ))),
        }
    }
}

/// Provider-side state of a payment intent or refund, collapsed to what the
/// unlock flow cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Succeeded,
    Failed,
    Pending,
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pending => "pending",
        })
    }
}

/// Who paid for what, attached to the intent at creation and echoed back on
/// verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub subject_id: String,
    pub target: Target,
    pub kind: UnlockKind,
    pub tag: Option<String>,
    pub score: Option<Decimal>,
}

impl IntentMetadata {
    /// Flattens into the string key/value form payment providers store.
    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        pairs.insert("subject_id".to_string(), self.subject_id.clone());
        pairs.insert("target_id".to_string(), self.target.id.clone());
        pairs.insert("target_type".to_string(), self.target.kind.to_string());
        pairs.insert("kind".to_string(), self.kind.to_string());
        if let Some(tag) = &self.tag {
            pairs.insert("tag".to_string(), tag.clone());
        }
        if let Some(score) = self.score {
            pairs.insert("score".to_string(), score.to_string());
        }
        pairs
    }

    /// Rebuilds metadata from provider pairs. Returns `None` when the intent was
    /// not created by this system (required keys missing or malformed).
    ///
    /// `tag` and `score` are optional: an unparsable score is dropped rather
    /// than discarding the subject and target binding with it.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Option<Self> {
        let subject_id = pairs.get("subject_id")?.clone();
        let kind = pairs.get("target_type")?.parse().ok()?;
        let target = Target::new(pairs.get("target_id")?.clone(), kind);
        let kind = pairs.get("kind")?.parse().ok()?;
        let tag = pairs.get("tag").cloned();
        let score = pairs.get("score").and_then(|raw| raw.trim().parse().ok());
        Some(Self {
            subject_id,
            target,
            kind,
            tag,
            score,
        })
    }

    pub fn entry_metadata(&self) -> Result<Option<EntryMetadata>, UnlockError> {
        if self.tag.is_none() && self.score.is_none() {
            return Ok(None);
        }
        EntryMetadata::new(self.tag.clone(), self.score).map(Some)
    }
}

/// Everything a provider needs to open an intent. Built by the gateway adapter;
/// the amount never comes from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount: Amount,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVerification {
    pub intent_id: String,
    pub status: IntentStatus,
    pub amount: u64,
    pub metadata_ref: Option<IntentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundVerification {
    pub refund_id: String,
    pub status: IntentStatus,
    pub amount: u64,
    pub payment_reference: String,
}

/// Derives the provider idempotency key for one unlock attempt, so repeated
/// "pay" clicks for the same subject, target and kind reuse one intent.
pub fn idempotency_key(subject_id: &str, target: &Target, kind: UnlockKind) -> String {
    let mut hasher = Sha256::new();
    for part in [subject_id, target.kind.as_str(), target.id.as_str(), kind.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("unlock-{}", hex::encode(&hasher.finalize()[..16]))
}

#[derive(Debug, Deserialize)]
struct InvestorPrice {
    id: String,
    source: TargetType,
    price: u64,
}

#[derive(Debug, Deserialize)]
struct PricingFile {
    project_visibility: Option<u64>,
    investor_default: Option<u64>,
    #[serde(default)]
    investor: Vec<InvestorPrice>,
}

/// Server-side price list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pricing {
    project_visibility: Amount,
    investor_default: Amount,
    overrides: HashMap<Target, Amount>,
}

impl Pricing {
    pub fn new(project_visibility: Amount, investor_default: Amount) -> Self {
        Self {
            project_visibility,
            investor_default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_investor_price(mut self, target: Target, price: Amount) -> Self {
        self.overrides.insert(target, price);
        self
    }

    /// Parses a TOML price list:
    ///
    /// ```toml
    /// project_visibility = 4900
    /// investor_default = 4900
    ///
    /// [[investor]]
    /// id = "42"
    /// source = "investor:platform"
    /// price = 9900
    /// ```
    pub fn from_toml(raw: &str) -> Result<Self, UnlockError> {
        let file: PricingFile = toml::from_str(raw)
            .map_err(|e| UnlockError::ConfigurationError(format!("Invalid pricing file: {e}")))?;
        let mut pricing = Self::new(
            Amount::new(file.project_visibility.unwrap_or(PROJECT_VISIBILITY_PRICE))?,
            Amount::new(file.investor_default.unwrap_or(DEFAULT_INVESTOR_PRICE))?,
        );
        for entry in file.investor {
            if !entry.source.is_investor() {
                return Err(UnlockError::ConfigurationError(format!(
                    "Price for '{}' must use an investor source, got {}",
                    entry.id, entry.source
                )));
            }
            let target = Target::new(entry.id, entry.source);
            pricing = pricing.with_investor_price(target, Amount::new(entry.price)?);
        }
        Ok(pricing)
    }

    pub fn price_for(&self, kind: UnlockKind, target: &Target) -> Amount {
        match kind {
            UnlockKind::ProjectVisibility => self.project_visibility,
            UnlockKind::InvestorUnlock => self
                .overrides
                .get(target)
                .copied()
                .unwrap_or(self.investor_default),
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            project_visibility: Amount(PROJECT_VISIBILITY_PRICE),
            investor_default: Amount(DEFAULT_INVESTOR_PRICE),
            overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_idempotency_key_is_stable_per_attempt() {
        let v42 = Target::platform_investor("42");
        let a = idempotency_key("S1", &v42, UnlockKind::InvestorUnlock);
        let b = idempotency_key("S1", &v42, UnlockKind::InvestorUnlock);
        assert_eq!(a, b);
        assert_ne!(a, idempotency_key("S2", &v42, UnlockKind::InvestorUnlock));
        assert_ne!(
            a,
            idempotency_key("S1", &Target::directory_investor("42"), UnlockKind::InvestorUnlock)
        );
    }

    #[test]
    fn test_metadata_pairs_round_trip() {
        let meta = IntentMetadata {
            subject_id: "S1".to_string(),
            target: Target::directory_investor("7"),
            kind: UnlockKind::InvestorUnlock,
            tag: Some("fintech".to_string()),
            score: Some(dec!(72.5)),
        };
        let pairs: HashMap<_, _> = meta.to_pairs().into_iter().collect();
        assert_eq!(IntentMetadata::from_pairs(&pairs), Some(meta));
    }

    #[test]
    fn test_malformed_score_keeps_binding() {
        let mut pairs: HashMap<_, _> = IntentMetadata {
            subject_id: "S1".to_string(),
            target: Target::platform_investor("42"),
            kind: UnlockKind::InvestorUnlock,
            tag: Some("fintech".to_string()),
            score: None,
        }
        .to_pairs()
        .into_iter()
        .collect();
        pairs.insert("score".to_string(), "high".to_string());

        let meta = IntentMetadata::from_pairs(&pairs).unwrap();
        assert_eq!(meta.subject_id, "S1");
        assert_eq!(meta.target, Target::platform_investor("42"));
        assert_eq!(meta.tag.as_deref(), Some("fintech"));
        assert_eq!(meta.score, None);

        pairs.remove("kind");
        assert_eq!(IntentMetadata::from_pairs(&pairs), None);
    }

    #[test]
    fn test_foreign_metadata_is_ignored() {
        let mut pairs = HashMap::new();
        pairs.insert("order_id".to_string(), "123".to_string());
        assert_eq!(IntentMetadata::from_pairs(&pairs), None);
    }

    #[test]
    fn test_pricing_from_toml() {
        let raw = r#"
            investor_default = 2900

            [[investor]]
            id = "42"
            source = "investor:platform"
            price = 9900
        "#;
        let pricing = Pricing::from_toml(raw).unwrap();
        let kind = UnlockKind::InvestorUnlock;
        let price = |target: Target| pricing.price_for(kind, &target).minor_units();
        assert_eq!(price(Target::platform_investor("42")), 9900);
        assert_eq!(price(Target::directory_investor("42")), 2900);
        assert_eq!(
            pricing
                .price_for(UnlockKind::ProjectVisibility, &Target::project("p1"))
                .minor_units(),
            PROJECT_VISIBILITY_PRICE
        );
    }

    #[test]
    fn test_pricing_rejects_project_override() {
        let raw = r#"
            [[investor]]
            id = "p1"
            source = "project-visibility"
            price = 100
        "#;
        assert!(matches!(
            Pricing::from_toml(raw),
            Err(UnlockError::ConfigurationError(_))
        ));
    }
}
