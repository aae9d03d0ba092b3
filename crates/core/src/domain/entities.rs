use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Investor risk appetite. Stored as text in the database, so parsing is
/// strict: unknown categories are a data error, not a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "Conservative",
            Self::Moderate => "Moderate",
            Self::Aggressive => "Aggressive",
        }
    }
}

impl FromStr for RiskProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Conservative" => Ok(Self::Conservative),
            "Moderate" => Ok(Self::Moderate),
            "Aggressive" => Ok(Self::Aggressive),
            other => anyhow::bail!("unknown risk profile: {other}"),
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk category attached to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductRisk {
    Low,
    Medium,
    High,
}

impl ProductRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl FromStr for ProductRisk {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Self::Low),
            "Medium" => Ok(Self::Medium),
            "High" => Ok(Self::High),
            other => anyhow::bail!("unknown product risk: {other}"),
        }
    }
}

impl fmt::Display for ProductRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub risk_profile: RiskProfile,
    /// Estimated total wealth, non-negative. Zero means "unknown or none";
    /// the affordability rule never triggers for it.
    pub total_wealth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub risk: ProductRisk,
    /// Trailing 12-month yield in percentage points; may be negative.
    pub yield_12m: f64,
    pub minimum_investment: f64,
}

/// One scored product. Immutable after the scoring run that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub product: Product,
    pub score: f64,
    pub reason: String,
}

/// The persisted, ranked output of one scoring run. Items are sorted by
/// descending score at creation time and never re-sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub id: Uuid,
    pub client_id: String,
    pub items: Vec<RecommendationItem>,
}

/// Outcome of an auxiliary fact lookup (ownership, recent interaction).
///
/// `Unknown` records a lookup failure without aborting the run: the rule it
/// feeds simply does not trigger, but telemetry can tell "doesn't own it"
/// apart from "couldn't check".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fact {
    Present,
    Absent,
    Unknown,
}

impl Fact {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }

    pub fn from_lookup(result: anyhow::Result<bool>) -> Self {
        match result {
            Ok(true) => Self::Present,
            Ok(false) => Self::Absent,
            Err(_) => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_profile_round_trips_through_str() {
        for profile in [
            RiskProfile::Conservative,
            RiskProfile::Moderate,
            RiskProfile::Aggressive,
        ] {
            assert_eq!(profile.as_str().parse::<RiskProfile>().unwrap(), profile);
        }
        assert!("Reckless".parse::<RiskProfile>().is_err());
    }

    #[test]
    fn fact_from_lookup_maps_errors_to_unknown() {
        assert_eq!(Fact::from_lookup(Ok(true)), Fact::Present);
        assert_eq!(Fact::from_lookup(Ok(false)), Fact::Absent);
        assert_eq!(
            Fact::from_lookup(Err(anyhow::anyhow!("db down"))),
            Fact::Unknown
        );
        assert!(!Fact::Unknown.is_present());
    }
}
