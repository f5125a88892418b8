use serde::{Deserialize, Serialize};
use std::fmt;

/// Onboarding progress of a subject, owned by an external gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingStage {
    NeedsProfile,
    NeedsPassword,
    Active,
}

impl OnboardingStage {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for OnboardingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NeedsProfile => "needs-profile",
            Self::NeedsPassword => "needs-password",
            Self::Active => "active",
        })
    }
}
