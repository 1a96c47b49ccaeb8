//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use r8_speeder_common::config::LimitsConfig;

/// Posted limit on special-route blocks that earns the route bonus.
const SPECIAL_ROUTE_POSTED_MPH: f64 = 25.0;

/// Computes the threshold speed checks are made against.
///
/// Rules apply in priority order and never stack:
/// 1. a priority train (symbol contains a configured token) gets the priority bonus;
/// 2. otherwise a block on the special route posted at exactly 25 mph gets the route bonus;
/// 3. otherwise the posted limit applies unchanged.
#[derive(Debug, Clone)]
pub struct EffectiveLimitCalculator {
    priority_bonus_mph: f64,
    priority_tokens: Vec<String>,
    special_route_bonus_mph: f64,
    special_route_prefix: String,
}

impl EffectiveLimitCalculator {
    pub fn new(
        priority_bonus_mph: f64,
        priority_tokens: &[String],
        special_route_bonus_mph: f64,
        special_route_prefix: impl Into<String>,
    ) -> Self {
        Self {
            priority_bonus_mph: priority_bonus_mph.max(0.0),
            priority_tokens: priority_tokens
                .iter()
                .map(|token| token.trim().to_uppercase())
                .filter(|token| !token.is_empty())
                .collect(),
            special_route_bonus_mph: special_route_bonus_mph.max(0.0),
            special_route_prefix: special_route_prefix.into(),
        }
    }

    pub fn from_config(config: &LimitsConfig) -> Self {
        Self::new(
            config.priority_bonus_mph,
            &config.priority_tokens,
            config.special_route_bonus_mph,
            config.special_route_prefix.clone(),
        )
    }

    pub fn is_priority_train(&self, train_symbol: &str) -> bool {
        let symbol = train_symbol.to_uppercase();
        self.priority_tokens
            .iter()
            .any(|token| symbol.contains(token.as_str()))
    }

    pub fn is_special_route(&self, posted_limit_mph: f64, block_id: i64) -> bool {
        !self.special_route_prefix.is_empty()
            && block_id.to_string().starts_with(&self.special_route_prefix)
            && posted_limit_mph == SPECIAL_ROUTE_POSTED_MPH
    }

    /// Effective limit in mph for the given posted limit, symbol, and block.
    pub fn effective_limit(&self, posted_limit_mph: f64, train_symbol: &str, block_id: i64) -> f64 {
        let posted = posted_limit_mph.abs();
        if self.is_priority_train(train_symbol) {
            posted + self.priority_bonus_mph
        } else if self.is_special_route(posted, block_id) {
            posted + self.special_route_bonus_mph
        } else {
            posted
        }
    }
}

impl Default for EffectiveLimitCalculator {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_train_uses_posted_limit() {
        let calc = EffectiveLimitCalculator::default();
        assert_eq!(calc.effective_limit(30.0, "Q123", 11000), 30.0);
    }

    #[test]
    fn priority_symbol_matches_case_insensitively() {
        let calc = EffectiveLimitCalculator::default();
        assert_eq!(calc.effective_limit(15.0, "991", 11000), 40.0);
        assert_eq!(calc.effective_limit(40.0, "amtk-super-chief", 11000), 65.0);
    }

    #[test]
    fn special_route_requires_prefix_and_exact_posted_limit() {
        let calc = EffectiveLimitCalculator::default();
        assert_eq!(calc.effective_limit(25.0, "TRONA1", 32017), 45.0);
        assert_eq!(calc.effective_limit(25.0, "TRONA1", 33017), 25.0);
        assert_eq!(calc.effective_limit(30.0, "TRONA1", 32017), 30.0);
        assert_eq!(calc.effective_limit(25.5, "TRONA1", 32017), 25.5);
    }

    #[test]
    fn priority_rule_wins_over_special_route() {
        let calc = EffectiveLimitCalculator::default();
        assert_eq!(calc.effective_limit(25.0, "X991", 32017), 50.0);
    }

    #[test]
    fn negative_posted_limit_is_taken_by_magnitude() {
        let calc = EffectiveLimitCalculator::default();
        assert_eq!(calc.effective_limit(-25.0, "TRONA1", 32017), 45.0);
    }

    #[test]
    fn effective_limit_never_below_posted() {
        let calc = EffectiveLimitCalculator::new(-5.0, &["A".to_owned()], -3.0, "1");
        for posted in [0.0, 10.0, 25.0, 79.0] {
            for (symbol, block) in [("A1", 100), ("B", 100), ("B", 200)] {
                assert!(calc.effective_limit(posted, symbol, block) >= posted);
            }
        }
    }
}
