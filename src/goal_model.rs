use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::dist::poisson_pmf_table;
use crate::fixtures::Fixture;
use crate::league_params::LeagueParams;
use crate::ratings::{RatingContext, RatingStore};

/// Expected goals for one fixture plus the low-score correlation used to
/// build its grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GoalRateEstimate {
    pub home_xg: f64,
    pub away_xg: f64,
    pub rho: f64,
}

/// Expected goals from the contextual rating differential through an
/// exponential link, scaled by the league's total-goal base and split by its
/// home-advantage share.
pub fn estimate_goal_rates(
    store: &RatingStore,
    fixture: &Fixture,
    league: &LeagueParams,
    cfg: &ModelConfig,
) -> GoalRateEstimate {
    let home_rating = store.get(
        fixture.home_id,
        fixture.league_id,
        RatingContext::VsOpponent { opponent_id: fixture.away_id, is_home: true },
    );
    let away_rating = store.get(
        fixture.away_id,
        fixture.league_id,
        RatingContext::VsOpponent { opponent_id: fixture.home_id, is_home: false },
    );
    estimate_from_ratings(home_rating, away_rating, cfg.rating_home_adv_pts, league, cfg)
}

/// Rating-differential form used by both the predictor and tests that feed
/// explicit ratings.
pub fn estimate_from_ratings(
    home_rating: f64,
    away_rating: f64,
    home_adv_pts: f64,
    league: &LeagueParams,
    cfg: &ModelConfig,
) -> GoalRateEstimate {
    // Each 400 rating points roughly doubles scoring expectation relative
    // to the opponent; the exponential link keeps rates positive.
    let diff = (home_rating + home_adv_pts - away_rating) / 400.0;
    let ratio = 10f64.powf(diff / 2.0);

    let total = league.goals_total_base;
    let home_share = 0.5 + league.home_adv_goals / 2.0;

    let home_base = total * home_share;
    let away_base = total - home_base;

    let home_xg = (home_base * ratio.sqrt()).clamp(cfg.xg_floor, cfg.xg_ceiling);
    let away_xg = (away_base / ratio.sqrt()).clamp(cfg.xg_floor, cfg.xg_ceiling);

    GoalRateEstimate { home_xg, away_xg, rho: league.dc_rho }
}

/// Dixon-Coles correction for the four low-score cells. Every other cell is
/// the plain independent-Poisson product.
fn tau(h: u32, a: u32, lambda_h: f64, lambda_a: f64, rho: f64) -> f64 {
    match (h, a) {
        (0, 0) => 1.0 - lambda_h * lambda_a * rho,
        (0, 1) => 1.0 + lambda_h * rho,
        (1, 0) => 1.0 + lambda_a * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    }
}

/// Joint score probability grid, normalised to 1. Sufficient to derive every
/// goal-based market.
#[derive(Debug, Clone)]
pub struct ScoreGrid {
    cells: Vec<f64>,
    max_goals: u32,
    pub home_xg: f64,
    pub away_xg: f64,
}

impl ScoreGrid {
    pub fn build(home_xg: f64, away_xg: f64, rho: f64, max_goals: u32, use_tau: bool) -> Self {
        let home_pmf = poisson_pmf_table(home_xg, max_goals);
        let away_pmf = poisson_pmf_table(away_xg, max_goals);
        let n = (max_goals + 1) as usize;

        let mut cells = vec![0.0; n * n];
        let mut mass = 0.0;
        for h in 0..n {
            for a in 0..n {
                let mut p = home_pmf[h] * away_pmf[a];
                if use_tau {
                    p *= tau(h as u32, a as u32, home_xg, away_xg, rho).max(0.0);
                }
                cells[h * n + a] = p;
                mass += p;
            }
        }
        if mass > 0.0 {
            for c in &mut cells {
                *c /= mass;
            }
        }

        Self { cells, max_goals, home_xg, away_xg }
    }

    pub fn from_estimate(est: &GoalRateEstimate, cfg: &ModelConfig) -> Self {
        Self::build(
            est.home_xg,
            est.away_xg,
            est.rho,
            cfg.max_goals,
            cfg.use_dixon_coles_tau,
        )
    }

    pub fn prob(&self, home_goals: u32, away_goals: u32) -> f64 {
        if home_goals > self.max_goals || away_goals > self.max_goals {
            return 0.0;
        }
        let n = (self.max_goals + 1) as usize;
        self.cells[home_goals as usize * n + away_goals as usize]
    }

    /// (home win, draw, away win) marginals.
    pub fn result_probs(&self) -> (f64, f64, f64) {
        let mut home = 0.0;
        let mut draw = 0.0;
        let mut away = 0.0;
        for h in 0..=self.max_goals {
            for a in 0..=self.max_goals {
                let p = self.prob(h, a);
                if h > a {
                    home += p;
                } else if h == a {
                    draw += p;
                } else {
                    away += p;
                }
            }
        }
        (home, draw, away)
    }

    /// P(home goals + away goals > line).
    pub fn total_goals_over(&self, line: f64) -> f64 {
        let mut over = 0.0;
        for h in 0..=self.max_goals {
            for a in 0..=self.max_goals {
                if (h + a) as f64 > line {
                    over += self.prob(h, a);
                }
            }
        }
        over
    }

    pub fn home_goals_over(&self, line: f64) -> f64 {
        let mut over = 0.0;
        for h in 0..=self.max_goals {
            if h as f64 > line {
                for a in 0..=self.max_goals {
                    over += self.prob(h, a);
                }
            }
        }
        over
    }

    pub fn away_goals_over(&self, line: f64) -> f64 {
        let mut over = 0.0;
        for a in 0..=self.max_goals {
            if a as f64 > line {
                for h in 0..=self.max_goals {
                    over += self.prob(h, a);
                }
            }
        }
        over
    }

    /// Both teams to score, read off the joint grid so the low-score
    /// correlation carries through.
    pub fn btts_yes(&self) -> f64 {
        let mut yes = 0.0;
        for h in 1..=self.max_goals {
            for a in 1..=self.max_goals {
                yes += self.prob(h, a);
            }
        }
        yes
    }

    pub fn most_likely_score(&self) -> (u32, u32, f64) {
        let mut best = (0, 0, 0.0);
        for h in 0..=self.max_goals {
            for a in 0..=self.max_goals {
                let p = self.prob(h, a);
                if p > best.2 {
                    best = (h, a, p);
                }
            }
        }
        best
    }

    /// Grid at half-time goal rates. The first half runs below half the
    /// full-match rate, so xG is scaled rather than halved.
    pub fn half_time(est: &GoalRateEstimate, cfg: &ModelConfig) -> Self {
        Self::build(
            est.home_xg * cfg.half_time_goal_share,
            est.away_xg * cfg.half_time_goal_share,
            est.rho,
            cfg.max_goals,
            cfg.use_dixon_coles_tau,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league_params::LeagueParams;

    #[test]
    fn grid_mass_is_one() {
        let grid = ScoreGrid::build(1.6, 1.1, -0.13, 10, true);
        let mut mass = 0.0;
        for h in 0..=10 {
            for a in 0..=10 {
                mass += grid.prob(h, a);
            }
        }
        assert!((mass - 1.0).abs() < 1e-9);
        let (ph, pd, pa) = grid.result_probs();
        assert!((ph + pd + pa - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tau_perturbs_only_low_cells() {
        let plain = ScoreGrid::build(1.4, 1.2, -0.13, 10, false);
        let adjusted = ScoreGrid::build(1.4, 1.2, -0.13, 10, true);
        // Compare pre-normalisation ratios: outside the four low cells the
        // ratio of adjusted to plain must be a constant (the normaliser).
        let norm = adjusted.prob(3, 2) / plain.prob(3, 2);
        for h in 0..=6u32 {
            for a in 0..=6u32 {
                let ratio = adjusted.prob(h, a) / plain.prob(h, a);
                if h > 1 || a > 1 {
                    assert!(
                        (ratio - norm).abs() < 1e-9,
                        "cell ({h},{a}) perturbed beyond normalisation"
                    );
                }
            }
        }
        // The four low cells move away from the uniform normaliser.
        assert!((adjusted.prob(0, 0) / plain.prob(0, 0) - norm).abs() > 1e-6);
        assert!((adjusted.prob(1, 1) / plain.prob(1, 1) - norm).abs() > 1e-6);
    }

    #[test]
    fn negative_rho_lifts_low_draws() {
        let plain = ScoreGrid::build(1.3, 1.1, -0.15, 10, false);
        let adjusted = ScoreGrid::build(1.3, 1.1, -0.15, 10, true);
        assert!(adjusted.prob(0, 0) > plain.prob(0, 0));
        assert!(adjusted.prob(1, 1) > plain.prob(1, 1));
    }

    #[test]
    fn stronger_home_side_gets_more_goals() {
        let cfg = ModelConfig::default();
        let league = LeagueParams::defaults(39);
        let est = estimate_from_ratings(1650.0, 1450.0, 70.0, &league, &cfg);
        assert!(est.home_xg > est.away_xg);
        assert!(est.home_xg >= cfg.xg_floor && est.home_xg <= cfg.xg_ceiling);
    }

    #[test]
    fn equal_ratings_keep_home_edge_from_league_share() {
        let cfg = ModelConfig::default();
        let league = LeagueParams::defaults(39);
        let est = estimate_from_ratings(1500.0, 1500.0, 0.0, &league, &cfg);
        assert!(est.home_xg > est.away_xg);
        assert!((est.home_xg + est.away_xg - league.goals_total_base).abs() < 0.2);
    }

    #[test]
    fn half_time_rates_scale_down() {
        let cfg = ModelConfig::default();
        let est = GoalRateEstimate { home_xg: 1.6, away_xg: 1.2, rho: -0.13 };
        let ht = ScoreGrid::half_time(&est, &cfg);
        let ft = ScoreGrid::from_estimate(&est, &cfg);
        // Fewer goals in a half: HT under 0.5 beats FT under 0.5.
        assert!(1.0 - ht.total_goals_over(0.5) > 1.0 - ft.total_goals_over(0.5));
    }

    #[test]
    fn btts_uses_joint_grid() {
        let grid = ScoreGrid::build(1.5, 1.2, -0.15, 10, true);
        let independent = ScoreGrid::build(1.5, 1.2, -0.15, 10, false);
        // Negative rho inflates 1-1 but deflates 0-1/1-0; the joint BTTS
        // differs from the independent version.
        assert!((grid.btts_yes() - independent.btts_yes()).abs() > 1e-6);
        assert!(grid.btts_yes() > 0.0 && grid.btts_yes() < 1.0);
    }
}
