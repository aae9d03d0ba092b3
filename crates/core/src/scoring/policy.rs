use crate::domain::{Client, Fact, Product, ProductRisk, RiskProfile};

/// Weights and thresholds for the five scoring rules.
///
/// The defaults reproduce the production business rules; the struct exists so
/// policy changes stay out of the engine. Rules are additive and independent,
/// evaluated in a fixed order (1..=5) so reason strings are deterministic.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub conservative_match_bonus: f64,
    pub moderate_match_bonus: f64,
    pub aggressive_match_bonus: f64,
    /// Yield threshold in percentage points, exclusive.
    pub good_yield_threshold: f64,
    pub good_yield_bonus: f64,
    /// Fraction of client wealth the minimum investment must stay under.
    pub affordability_fraction: f64,
    pub affordability_bonus: f64,
    pub ownership_penalty: f64,
    pub recent_interest_bonus: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            conservative_match_bonus: 0.30,
            moderate_match_bonus: 0.25,
            aggressive_match_bonus: 0.20,
            good_yield_threshold: 10.0,
            good_yield_bonus: 0.10,
            affordability_fraction: 0.05,
            affordability_bonus: 0.10,
            ownership_penalty: 0.20,
            recent_interest_bonus: 0.15,
        }
    }
}

impl ScoringPolicy {
    /// Scores one (client, product) pair against the rule set.
    ///
    /// Returns the final score and the space-separated reason tags of the
    /// rules that triggered, in rule order. The ownership penalty is silent:
    /// it adjusts the score without contributing a tag.
    pub fn score_product(
        &self,
        client: &Client,
        product: &Product,
        owned: Fact,
        interacted: Fact,
    ) -> (f64, String) {
        let mut score = 0.0;
        let mut reason = String::new();

        // 1. Risk-profile match: exact pairing only, no partial credit.
        let match_bonus = match (client.risk_profile, product.risk) {
            (RiskProfile::Conservative, ProductRisk::Low) => Some(self.conservative_match_bonus),
            (RiskProfile::Moderate, ProductRisk::Medium) => Some(self.moderate_match_bonus),
            (RiskProfile::Aggressive, ProductRisk::High) => Some(self.aggressive_match_bonus),
            _ => None,
        };
        if let Some(bonus) = match_bonus {
            score += bonus;
            reason.push_str("[profile match] ");
        }

        // 2. Profitability.
        if product.yield_12m > self.good_yield_threshold {
            score += self.good_yield_bonus;
            reason.push_str("[good yield] ");
        }

        // 3. Affordability. The positivity check guards the threshold when
        // wealth is zero or unknown.
        if client.total_wealth > 0.0
            && product.minimum_investment < client.total_wealth * self.affordability_fraction
        {
            score += self.affordability_bonus;
            reason.push_str("[affordable] ");
        }

        // 4. Diversification penalty, no tag.
        if owned.is_present() {
            score -= self.ownership_penalty;
        }

        // 5. Recent-interest boost.
        if interacted.is_present() {
            score += self.recent_interest_bonus;
            reason.push_str("[recent interest] ");
        }

        (score, reason)
    }
}
