use crate::error::UnlockError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weight assigned to entries whose metadata carries no score.
pub const NEUTRAL_SCORE: Decimal = dec!(50);
/// Upper bound of a per-entry score weight.
pub const MAX_SCORE: Decimal = dec!(100);
/// Trailing demand window used when callers don't pick one.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Kind of record a ledger target refers to.
///
/// Investors come from two directories whose numeric ids overlap, so the source
/// is part of the target's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetType {
    #[serde(rename = "investor:platform")]
    PlatformInvestor,
    #[serde(rename = "investor:external-directory")]
    DirectoryInvestor,
    #[serde(rename = "project-visibility")]
    ProjectVisibility,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlatformInvestor => "investor:platform",
            Self::DirectoryInvestor => "investor:external-directory",
            Self::ProjectVisibility => "project-visibility",
        }
    }

    pub fn is_investor(self) -> bool {
        matches!(self, Self::PlatformInvestor | Self::DirectoryInvestor)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = UnlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "investor:platform" | "platform" => Ok(Self::PlatformInvestor),
            "investor:external-directory" | "external-directory" => Ok(Self::DirectoryInvestor),
            "project-visibility" | "project" => Ok(Self::ProjectVisibility),
            other => Err(UnlockError::ValidationError(format!(
                "Unknown target type '{other}'"
            ))),
        }
    }
}

/// Identity of an unlockable record: its id within its source plus the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub kind: TargetType,
}

impl Target {
    pub fn new(id: impl Into<String>, kind: TargetType) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn platform_investor(id: impl Into<String>) -> Self {
        Self::new(id, TargetType::PlatformInvestor)
    }

    pub fn directory_investor(id: impl Into<String>) -> Self {
        Self::new(id, TargetType::DirectoryInvestor)
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self::new(id, TargetType::ProjectVisibility)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Ledger-assigned entry id. Strictly increasing in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A positive amount in minor currency units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(pub(crate) u64);

impl Amount {
    pub fn new(minor_units: u64) -> Result<Self, UnlockError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(UnlockError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = UnlockError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Optional demand attributes carried from the payment intent onto the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Category of the paying founder's project, used for "top tag".
    pub tag: Option<String>,
    /// Weight in `0..=100` used for leaderboard averages.
    pub score: Option<Decimal>,
}

impl EntryMetadata {
    pub fn new(tag: Option<String>, score: Option<Decimal>) -> Result<Self, UnlockError> {
        if let Some(score) = score
            && (score < Decimal::ZERO || score > MAX_SCORE)
        {
            return Err(UnlockError::ValidationError(format!(
                "Score {score} is outside 0..={MAX_SCORE}"
            )));
        }
        let tag = tag
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self { tag, score })
    }

    pub fn weight(metadata: Option<&Self>) -> Decimal {
        metadata.and_then(|m| m.score).unwrap_or(NEUTRAL_SCORE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A confirmed payment that grants access to its target.
    Unlock,
    /// A compensating record for a refunded unlock. Never grants access.
    Refund,
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub subject_id: String,
    pub target: Target,
    pub payment_reference: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<EntryMetadata>,
    /// For refunds, the unlock entry being compensated.
    pub compensates: Option<EntryId>,
}

impl LedgerEntry {
    pub fn is_unlock(&self) -> bool {
        self.kind == EntryKind::Unlock
    }

    pub fn weight(&self) -> Decimal {
        EntryMetadata::weight(self.metadata.as_ref())
    }

    pub fn tag(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.tag.as_deref())
    }
}

/// An entry as submitted to the store, before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub kind: EntryKind,
    pub subject_id: String,
    pub target: Target,
    pub payment_reference: String,
    pub amount: Amount,
    pub metadata: Option<EntryMetadata>,
    pub compensates: Option<EntryId>,
}

impl NewLedgerEntry {
    pub fn unlock(
        subject_id: impl Into<String>,
        target: Target,
        payment_reference: impl Into<String>,
        amount: Amount,
        metadata: Option<EntryMetadata>,
    ) -> Self {
        Self {
            kind: EntryKind::Unlock,
            subject_id: subject_id.into(),
            target,
            payment_reference: payment_reference.into(),
            amount,
            metadata,
            compensates: None,
        }
    }

    pub fn refund(original: &LedgerEntry, refund_reference: impl Into<String>, amount: Amount) -> Self {
        Self {
            kind: EntryKind::Refund,
            subject_id: original.subject_id.clone(),
            target: original.target.clone(),
            payment_reference: refund_reference.into(),
            amount,
            metadata: None,
            compensates: Some(original.id),
        }
    }

    pub fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            kind: self.kind,
            subject_id: self.subject_id,
            target: self.target,
            payment_reference: self.payment_reference,
            amount: self.amount,
            created_at,
            metadata: self.metadata,
            compensates: self.compensates,
        }
    }
}

/// Trailing period over which demand is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandWindow {
    days: u32,
}

impl DemandWindow {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn length(&self) -> u32 {
        self.days
    }

    /// Oldest `created_at` still inside the window ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }

    pub fn contains(&self, now: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        at >= self.start(now) && at <= now
    }
}

impl Default for DemandWindow {
    fn default() -> Self {
        Self::days(DEFAULT_WINDOW_DAYS)
    }
}
