use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::evaluate::CorrelationMatrix;

/// One leg of a proposed parlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParlaySelection {
    pub fixture_id: u64,
    pub market: String,
    pub pick: String,
    pub odds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParlayVerdict {
    Accept,
    AcceptWithPenalty,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParlayValidation {
    pub verdict: ParlayVerdict,
    pub reason: String,
    /// Product of the legs' odds with the correlation penalty applied.
    pub adjusted_combined_odds: f64,
    pub max_pairwise_correlation: f64,
}

/// Validates multi-leg combinations against the fitted correlation matrix,
/// with market-shape heuristics for pairs the matrix has never seen.
/// Cross-fixture legs are treated as independent.
pub struct ParlayValidator<'a> {
    matrix: &'a CorrelationMatrix,
    cfg: &'a ModelConfig,
}

impl<'a> ParlayValidator<'a> {
    pub fn new(matrix: &'a CorrelationMatrix, cfg: &'a ModelConfig) -> Self {
        Self { matrix, cfg }
    }

    pub fn validate(&self, selections: &[ParlaySelection]) -> ParlayValidation {
        let combined: f64 = selections.iter().map(|s| s.odds).product();
        if selections.len() < 2 {
            return ParlayValidation {
                verdict: ParlayVerdict::Accept,
                reason: "single leg".to_string(),
                adjusted_combined_odds: combined,
                max_pairwise_correlation: 0.0,
            };
        }

        let mut max_r = 0.0f64;
        let mut worst_pair: Option<(&ParlaySelection, &ParlaySelection, f64)> = None;
        let mut moderate_pairs = 0usize;

        for (i, a) in selections.iter().enumerate() {
            for b in selections.iter().skip(i + 1) {
                if a.fixture_id != b.fixture_id {
                    continue;
                }
                let r = self.pair_correlation(a, b);
                if r.abs() > max_r.abs() {
                    max_r = r;
                    worst_pair = Some((a, b, r));
                }
                if r.abs() > self.cfg.parlay_high_correlation {
                    return ParlayValidation {
                        verdict: ParlayVerdict::Reject,
                        reason: format!(
                            "{} + {} move together (r={:.2}); combining them reduces value",
                            a.market, b.market, r
                        ),
                        adjusted_combined_odds: combined,
                        max_pairwise_correlation: r,
                    };
                }
                if r.abs() > self.cfg.parlay_moderate_correlation {
                    moderate_pairs += 1;
                }
            }
        }

        if moderate_pairs > 0 {
            let penalty = self.cfg.parlay_moderate_penalty.powi(moderate_pairs as i32);
            let (a, b, r) = worst_pair.unwrap_or((&selections[0], &selections[1], max_r));
            debug!(
                market_a = %a.market,
                market_b = %b.market,
                r,
                penalty,
                "moderate correlation penalty applied"
            );
            return ParlayValidation {
                verdict: ParlayVerdict::AcceptWithPenalty,
                reason: format!(
                    "moderate correlation between {} and {} (r={:.2}); odds adjusted",
                    a.market, b.market, r
                ),
                adjusted_combined_odds: combined * penalty,
                max_pairwise_correlation: max_r,
            };
        }

        ParlayValidation {
            verdict: ParlayVerdict::Accept,
            reason: "legs are effectively independent".to_string(),
            adjusted_combined_odds: combined,
            max_pairwise_correlation: max_r,
        }
    }

    fn pair_correlation(&self, a: &ParlaySelection, b: &ParlaySelection) -> f64 {
        // Same market, different outcome: mutually exclusive.
        if a.market == b.market {
            return if a.pick == b.pick { 1.0 } else { -1.0 };
        }
        if let Some(r) = self.matrix.get(&a.market, &b.market) {
            return r;
        }
        estimate_correlation(&a.market, &b.market)
    }

    /// Most independent market pairs the matrix knows, for suggesting
    /// combinations.
    pub fn recommendations(&self, n: usize) -> Vec<(String, String, f64)> {
        self.matrix
            .least_correlated_pairs(n)
            .into_iter()
            .filter(|(_, _, r)| r.abs() <= self.cfg.parlay_moderate_correlation)
            .collect()
    }
}

fn is_result_market(market: &str) -> bool {
    market == "1x2" || market == "ht_1x2"
}

fn is_goal_total_market(market: &str) -> bool {
    market.starts_with("total_goals_over_") || market.starts_with("ht_goals_over_")
}

/// Shape-based estimate for pairs missing from the matrix. Conservative:
/// adjacent total lines are assumed strongly related, result and totals
/// nearly independent, anything unknown mildly positive.
fn estimate_correlation(a: &str, b: &str) -> f64 {
    if is_goal_total_market(a) && is_goal_total_market(b) {
        return 0.6;
    }
    if (is_result_market(a) && is_goal_total_market(b))
        || (is_goal_total_market(a) && is_result_market(b))
    {
        return 0.05;
    }
    if is_result_market(a) && is_result_market(b) {
        return -0.5;
    }
    0.15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::BacktestRecord;

    fn leg(fixture_id: u64, market: &str, pick: &str, odds: f64) -> ParlaySelection {
        ParlaySelection {
            fixture_id,
            market: market.to_string(),
            pick: pick.to_string(),
            odds,
        }
    }

    fn record(fixture_id: u64, market: &str, realized: &str) -> BacktestRecord {
        BacktestRecord {
            fixture_id,
            league_id: 39,
            config: "candidate".to_string(),
            market: market.to_string(),
            pick: "over".to_string(),
            predicted: 0.6,
            realized: realized.to_string(),
            hit: true,
            confidence: 0.6,
            odds: None,
        }
    }

    /// Matrix where over-2.5 and over-3.5 track closely (r about 0.76) and
    /// home-win is unrelated to over-1.5 (r near zero).
    fn fitted_matrix() -> CorrelationMatrix {
        let mut records = Vec::new();
        for i in 0..100u64 {
            let over25 = i % 5 != 0;
            let over35 = over25 && i % 10 != 1;
            let home = i % 3 == 0;
            let over15 = i % 7 != 0;
            records.push(record(i, "total_goals_over_2.5", if over25 { "over" } else { "under" }));
            records.push(record(i, "total_goals_over_3.5", if over35 { "over" } else { "under" }));
            records.push(record(i, "1x2", if home { "home" } else { "away" }));
            records.push(record(i, "total_goals_over_1.5", if over15 { "over" } else { "under" }));
        }
        CorrelationMatrix::compute(&records)
    }

    #[test]
    fn highly_correlated_same_fixture_pair_is_rejected() {
        let cfg = ModelConfig::default();
        let matrix = fitted_matrix();
        let r = matrix
            .get("total_goals_over_2.5", "total_goals_over_3.5")
            .unwrap();
        assert!(r > cfg.parlay_high_correlation, "fixture data too weak: r={r}");

        let validator = ParlayValidator::new(&matrix, &cfg);
        let validation = validator.validate(&[
            leg(9, "total_goals_over_2.5", "over", 1.8),
            leg(9, "total_goals_over_3.5", "over", 2.6),
        ]);
        assert_eq!(validation.verdict, ParlayVerdict::Reject);
        assert!(validation.max_pairwise_correlation > cfg.parlay_high_correlation);
    }

    #[test]
    fn near_independent_pair_is_accepted_clean() {
        let cfg = ModelConfig::default();
        let matrix = fitted_matrix();
        let r = matrix.get("1x2", "total_goals_over_1.5").unwrap();
        assert!(r.abs() < cfg.parlay_moderate_correlation, "r={r}");

        let validator = ParlayValidator::new(&matrix, &cfg);
        let validation = validator.validate(&[
            leg(9, "1x2", "home", 1.9),
            leg(9, "total_goals_over_1.5", "over", 1.4),
        ]);
        assert_eq!(validation.verdict, ParlayVerdict::Accept);
        assert!((validation.adjusted_combined_odds - 1.9 * 1.4).abs() < 1e-12);
    }

    #[test]
    fn cross_fixture_legs_are_independent() {
        let cfg = ModelConfig::default();
        let matrix = fitted_matrix();
        let validator = ParlayValidator::new(&matrix, &cfg);
        // Same strongly-correlated markets, but on different fixtures.
        let validation = validator.validate(&[
            leg(1, "total_goals_over_2.5", "over", 1.8),
            leg(2, "total_goals_over_3.5", "over", 2.6),
        ]);
        assert_eq!(validation.verdict, ParlayVerdict::Accept);
        assert_eq!(validation.max_pairwise_correlation, 0.0);
    }

    #[test]
    fn same_market_opposite_picks_rejected() {
        let cfg = ModelConfig::default();
        let matrix = CorrelationMatrix::default();
        let validator = ParlayValidator::new(&matrix, &cfg);
        let validation = validator.validate(&[
            leg(5, "btts", "yes", 1.8),
            leg(5, "btts", "no", 2.0),
        ]);
        assert_eq!(validation.verdict, ParlayVerdict::Reject);
    }

    #[test]
    fn unseen_adjacent_totals_fall_back_to_heuristic_penalty() {
        let cfg = ModelConfig::default();
        let matrix = CorrelationMatrix::default();
        let validator = ParlayValidator::new(&matrix, &cfg);
        let validation = validator.validate(&[
            leg(5, "total_goals_over_2.5", "over", 1.8),
            leg(5, "total_goals_over_3.5", "over", 2.6),
        ]);
        // Heuristic 0.6 lands in the moderate band.
        assert_eq!(validation.verdict, ParlayVerdict::AcceptWithPenalty);
        let expected = 1.8 * 2.6 * cfg.parlay_moderate_penalty;
        assert!((validation.adjusted_combined_odds - expected).abs() < 1e-12);
    }

    #[test]
    fn recommendations_exclude_correlated_pairs() {
        let cfg = ModelConfig::default();
        let matrix = fitted_matrix();
        let validator = ParlayValidator::new(&matrix, &cfg);
        for (_, _, r) in validator.recommendations(5) {
            assert!(r.abs() <= cfg.parlay_moderate_correlation);
        }
    }
}
