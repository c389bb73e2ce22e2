use serde::{Deserialize, Serialize};

pub const TRUST_FLOOR: f64 = 1.0;
pub const TRUST_CEILING: f64 = 5.0;

/// Level thresholds over the weight.
pub const TRUST_VERIFIED_MIN: f64 = 2.1;
pub const TRUST_PREMIUM_MIN: f64 = 4.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Basic,
    Verified,
    Premium,
}

impl TrustLevel {
    pub fn from_weight(weight: f64) -> Self {
        if weight >= TRUST_PREMIUM_MIN {
            TrustLevel::Premium
        } else if weight >= TRUST_VERIFIED_MIN {
            TrustLevel::Verified
        } else {
            TrustLevel::Basic
        }
    }
}

/// Per-submitter multiplier, always within [1.0, 5.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct TrustWeight {
    value: f64,
    level: TrustLevel,
}

impl TrustWeight {
    pub fn new(value: f64) -> Self {
        let value = if value.is_finite() {
            value.clamp(TRUST_FLOOR, TRUST_CEILING)
        } else {
            TRUST_FLOOR
        };
        Self {
            value,
            level: TrustLevel::from_weight(value),
        }
    }

    pub fn floor() -> Self {
        Self::new(TRUST_FLOOR)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn level(&self) -> TrustLevel {
        self.level
    }
}

impl From<f64> for TrustWeight {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<TrustWeight> for f64 {
    fn from(weight: TrustWeight) -> Self {
        weight.value
    }
}

impl Default for TrustWeight {
    fn default() -> Self {
        Self::floor()
    }
}

/// Verification state and track record of one submitter, as reported by the
/// identity-verification collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitterHistory {
    pub submitter_id: String,
    #[serde(default)]
    pub phone_verified: bool,
    /// KTP document OCR passed
    #[serde(default)]
    pub id_document_verified: bool,
    /// Selfie matched the ID photo. Only meaningful after ID verification.
    #[serde(default)]
    pub selfie_matched: bool,
    #[serde(default)]
    pub social_links: u32,
    #[serde(default)]
    pub endorsements: u32,
    /// Reports that moderation later confirmed.
    #[serde(default)]
    pub confirmed_reports: u32,
    /// Reports that moderation reviewed (confirmed or dismissed).
    #[serde(default)]
    pub reviewed_reports: u32,
    #[serde(default)]
    pub total_reports: u32,
}
