use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ModelConfig;
use crate::dist::{neg_binomial_cdf, poisson_cdf};
use crate::fixtures::SettledFixture;
use crate::goal_model::ScoreGrid;
use crate::quality::Grade;
use crate::signals::SquadAdjustment;

/// One market's probability distribution. Immutable once the predictor hands
/// it out; a new prediction supersedes, never edits, an old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrediction {
    pub market: String,
    pub probs: BTreeMap<String, f64>,
    pub confidence: f64,
    pub grade: Grade,
    /// Calibration fallback level, when a coarser map had to be used.
    pub fallback: Option<String>,
}

impl MarketPrediction {
    /// Modal outcome label and its probability.
    pub fn pick(&self) -> Option<(&str, f64)> {
        self.probs
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, v)| (k.as_str(), *v))
    }

    pub fn prob(&self, outcome: &str) -> Option<f64> {
        self.probs.get(outcome).copied()
    }
}

/// Rolling per-team averages of the auxiliary counts, built from the settled
/// feed. Unseen teams resolve to league averages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAggregates {
    pub matches_played: u32,
    pub goals_scored_avg: f64,
    pub goals_conceded_avg: f64,
    pub corners_for_avg: f64,
    pub cards_avg: f64,
    pub shots_avg: f64,
    pub shots_on_target_avg: f64,
    pub offsides_avg: f64,
    pub fouls_avg: f64,
    pub clean_sheets: u32,
}

impl TeamAggregates {
    pub fn league_default(cfg: &ModelConfig) -> Self {
        Self {
            matches_played: 0,
            goals_scored_avg: cfg.league_avg_goals / 2.0,
            goals_conceded_avg: cfg.league_avg_goals / 2.0,
            corners_for_avg: cfg.league_avg_corners / 2.0,
            cards_avg: cfg.league_avg_cards / 2.0,
            shots_avg: cfg.league_avg_shots / 2.0,
            shots_on_target_avg: cfg.league_avg_shots_on_target / 2.0,
            offsides_avg: cfg.league_avg_offsides / 2.0,
            fouls_avg: cfg.league_avg_fouls / 2.0,
            clean_sheets: 0,
        }
    }

    pub fn clean_sheet_rate(&self) -> f64 {
        if self.matches_played == 0 {
            return 0.0;
        }
        self.clean_sheets as f64 / self.matches_played as f64
    }
}

#[derive(Debug, Default, Clone)]
struct AggregateAcc {
    matches: u32,
    goals_for: u32,
    goals_against: u32,
    corners: u32,
    corners_n: u32,
    cards: u32,
    cards_n: u32,
    shots: u32,
    shots_n: u32,
    sot: u32,
    sot_n: u32,
    offsides: u32,
    offsides_n: u32,
    clean_sheets: u32,
}

impl AggregateAcc {
    fn absorb(&mut self, goals_for: u32, goals_against: u32, side: Side, aux: &crate::fixtures::AuxStats) {
        self.matches += 1;
        self.goals_for += goals_for;
        self.goals_against += goals_against;
        if goals_against == 0 {
            self.clean_sheets += 1;
        }
        let (corners, cards, shots, sot, offsides) = match side {
            Side::Home => (
                aux.home_corners,
                aux.home_cards,
                aux.home_shots,
                aux.home_shots_on_target,
                aux.home_offsides,
            ),
            Side::Away => (
                aux.away_corners,
                aux.away_cards,
                aux.away_shots,
                aux.away_shots_on_target,
                aux.away_offsides,
            ),
        };
        if let Some(c) = corners {
            self.corners += c;
            self.corners_n += 1;
        }
        if let Some(c) = cards {
            self.cards += c;
            self.cards_n += 1;
        }
        if let Some(s) = shots {
            self.shots += s;
            self.shots_n += 1;
        }
        if let Some(s) = sot {
            self.sot += s;
            self.sot_n += 1;
        }
        if let Some(o) = offsides {
            self.offsides += o;
            self.offsides_n += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Home,
    Away,
}

/// Accumulates per-team aggregates match by match. Like the rating store it
/// is only ever fed settled fixtures from the ordered replay.
#[derive(Debug, Default, Clone)]
pub struct AggregateStore {
    teams: HashMap<u32, AggregateAcc>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, settled: &SettledFixture) {
        self.teams.entry(settled.fixture.home_id).or_default().absorb(
            settled.home_goals,
            settled.away_goals,
            Side::Home,
            &settled.aux,
        );
        self.teams.entry(settled.fixture.away_id).or_default().absorb(
            settled.away_goals,
            settled.home_goals,
            Side::Away,
            &settled.aux,
        );
    }

    pub fn get(&self, team_id: u32, cfg: &ModelConfig) -> TeamAggregates {
        let defaults = TeamAggregates::league_default(cfg);
        let Some(acc) = self.teams.get(&team_id) else {
            return defaults;
        };
        if acc.matches == 0 {
            return defaults;
        }
        let avg = |sum: u32, n: u32, default: f64| {
            if n == 0 { default } else { sum as f64 / n as f64 }
        };
        TeamAggregates {
            matches_played: acc.matches,
            goals_scored_avg: acc.goals_for as f64 / acc.matches as f64,
            goals_conceded_avg: acc.goals_against as f64 / acc.matches as f64,
            corners_for_avg: avg(acc.corners, acc.corners_n, defaults.corners_for_avg),
            cards_avg: avg(acc.cards, acc.cards_n, defaults.cards_avg),
            shots_avg: avg(acc.shots, acc.shots_n, defaults.shots_avg),
            shots_on_target_avg: avg(acc.sot, acc.sot_n, defaults.shots_on_target_avg),
            offsides_avg: avg(acc.offsides, acc.offsides_n, defaults.offsides_avg),
            fouls_avg: defaults.fouls_avg,
            clean_sheets: acc.clean_sheets,
        }
    }
}

/// Repairs an outcome distribution in place: renormalise to unit mass, clamp
/// into the clip band, then settle the clamping residue on the largest
/// outcome so both the mass and the bounds hold exactly.
pub(crate) fn clip_and_renormalise(probs: &mut BTreeMap<String, f64>, cfg: &ModelConfig) {
    let mass: f64 = probs.values().sum();
    if mass > 0.0 {
        for p in probs.values_mut() {
            *p /= mass;
        }
    }

    for p in probs.values_mut() {
        *p = p.clamp(cfg.prob_clip_lo, cfg.prob_clip_hi);
    }
    let clipped_mass: f64 = probs.values().sum();
    let residue = clipped_mass - 1.0;
    if residue != 0.0 {
        // The largest outcome has headroom on both sides of the band.
        if let Some(p) = probs
            .values_mut()
            .max_by(|a, b| a.total_cmp(b))
        {
            *p -= residue;
        }
    }
}

/// Repairs the raw distribution into the clip band at unit mass. A mass
/// violation beyond tolerance is repaired and logged, never returned raw.
fn finalize(market: &str, mut probs: BTreeMap<String, f64>, cfg: &ModelConfig) -> MarketPrediction {
    let raw_mass: f64 = probs.values().sum();
    if (raw_mass - 1.0).abs() > 1e-6 {
        warn!(market, raw_mass, "probability mass violation repaired");
    }
    clip_and_renormalise(&mut probs, cfg);

    let confidence = probs.values().copied().fold(0.0, f64::max);
    MarketPrediction {
        market: market.to_string(),
        probs,
        confidence,
        grade: Grade::C,
        fallback: None,
    }
}

fn over_under(market: &str, p_over: f64, cfg: &ModelConfig) -> MarketPrediction {
    let probs = BTreeMap::from([
        ("over".to_string(), p_over),
        ("under".to_string(), 1.0 - p_over),
    ]);
    finalize(market, probs, cfg)
}

fn fmt_line(line: f64) -> String {
    format!("{line:.1}")
}

/// Everything `derive_markets` needs beyond the score grids.
pub struct MarketInputs<'a> {
    pub home_agg: &'a TeamAggregates,
    pub away_agg: &'a TeamAggregates,
    pub squad: &'a SquadAdjustment,
    /// (total, home, away) expected cards from the referee adjuster.
    pub expected_cards: (f64, f64, f64),
}

/// The full market book for one fixture.
pub fn derive_markets(
    grid: &ScoreGrid,
    ht_grid: &ScoreGrid,
    inputs: &MarketInputs,
    cfg: &ModelConfig,
) -> Vec<MarketPrediction> {
    let mut book = Vec::with_capacity(40);

    book.push(result_market(grid, inputs.squad, cfg));

    for line in [0.5, 1.5, 2.5, 3.5, 4.5, 5.5] {
        book.push(over_under(
            &format!("total_goals_over_{}", fmt_line(line)),
            grid.total_goals_over(line),
            cfg,
        ));
    }
    for line in [0.5, 1.5, 2.5] {
        book.push(over_under(
            &format!("home_goals_over_{}", fmt_line(line)),
            grid.home_goals_over(line),
            cfg,
        ));
        book.push(over_under(
            &format!("away_goals_over_{}", fmt_line(line)),
            grid.away_goals_over(line),
            cfg,
        ));
    }

    let btts = grid.btts_yes();
    book.push(finalize(
        "btts",
        BTreeMap::from([("yes".to_string(), btts), ("no".to_string(), 1.0 - btts)]),
        cfg,
    ));

    // Half-time, off the scaled grid.
    let (ht_h, ht_d, ht_a) = ht_grid.result_probs();
    book.push(finalize(
        "ht_1x2",
        BTreeMap::from([
            ("home".to_string(), ht_h),
            ("draw".to_string(), ht_d),
            ("away".to_string(), ht_a),
        ]),
        cfg,
    ));
    for line in [0.5, 1.5] {
        book.push(over_under(
            &format!("ht_goals_over_{}", fmt_line(line)),
            ht_grid.total_goals_over(line),
            cfg,
        ));
    }

    book.extend(corner_markets(inputs, cfg));
    book.extend(card_markets(inputs, cfg));
    book.extend(shot_markets(inputs, cfg));
    book.extend(offside_markets(inputs, cfg));

    book
}

/// 1X2 with the squad-quality nudge: the boost is taken from the draw and
/// handed to the stronger side, never driving any outcome negative.
fn result_market(grid: &ScoreGrid, squad: &SquadAdjustment, cfg: &ModelConfig) -> MarketPrediction {
    let (mut home, mut draw, mut away) = grid.result_probs();

    let boost = (squad.result_boost_home - squad.result_boost_away).clamp(
        -cfg.squad_result_boost_cap,
        cfg.squad_result_boost_cap,
    );
    let taken = boost.abs().min(draw);
    draw -= taken;
    if boost > 0.0 {
        home += taken;
    } else {
        away += taken;
    }

    finalize(
        "1x2",
        BTreeMap::from([
            ("home".to_string(), home),
            ("draw".to_string(), draw),
            ("away".to_string(), away),
        ]),
        cfg,
    )
}

/// Corners are overdispersed: Negative Binomial with the configured
/// dispersion, not Poisson.
fn corner_markets(inputs: &MarketInputs, cfg: &ModelConfig) -> Vec<MarketPrediction> {
    let home = (inputs.home_agg.corners_for_avg * cfg.home_adv_corners
        + inputs.squad.corners_home)
        .clamp(1.0, 10.0);
    let away = (inputs.away_agg.corners_for_avg + inputs.squad.corners_away).clamp(1.0, 10.0);
    let total = home + away;

    let mut out = Vec::new();
    for line in [7.5, 8.5, 9.5, 10.5, 11.5, 12.5] {
        let p_over = 1.0 - neg_binomial_cdf(total, cfg.nb_dispersion_alpha, line as u32);
        out.push(over_under(
            &format!("total_corners_over_{}", fmt_line(line)),
            p_over,
            cfg,
        ));
    }
    for (side, mean) in [("home", home), ("away", away)] {
        for line in [3.5, 4.5, 5.5, 6.5] {
            let p_over = 1.0 - neg_binomial_cdf(mean, cfg.nb_dispersion_alpha, line as u32);
            out.push(over_under(
                &format!("{side}_corners_over_{}", fmt_line(line)),
                p_over,
                cfg,
            ));
        }
    }
    out
}

fn card_markets(inputs: &MarketInputs, cfg: &ModelConfig) -> Vec<MarketPrediction> {
    let (total, _, _) = inputs.expected_cards;
    let total =
        (total + inputs.squad.cards_total).clamp(cfg.cards_total_floor, cfg.cards_total_ceiling);

    [2.5, 3.5, 4.5, 5.5, 6.5]
        .iter()
        .map(|&line| {
            let p_over = 1.0 - poisson_cdf(total, line as u32);
            over_under(&format!("total_cards_over_{}", fmt_line(line)), p_over, cfg)
        })
        .collect()
}

fn shot_markets(inputs: &MarketInputs, cfg: &ModelConfig) -> Vec<MarketPrediction> {
    let home_shots = (inputs.home_agg.shots_avg * cfg.home_adv_shots + inputs.squad.shots_home)
        .clamp(5.0, 22.0);
    let away_shots = (inputs.away_agg.shots_avg + inputs.squad.shots_away).clamp(5.0, 22.0);
    let home_sot = (inputs.home_agg.shots_on_target_avg * cfg.home_adv_shots
        + inputs.squad.shots_on_target_home)
        .clamp(2.0, 10.0);
    let away_sot =
        (inputs.away_agg.shots_on_target_avg + inputs.squad.shots_on_target_away).clamp(2.0, 10.0);

    let total_shots = home_shots + away_shots;
    let total_sot = home_sot + away_sot;

    let mut out = Vec::new();
    for line in [6.5, 7.5, 8.5, 9.5, 10.5] {
        let p_over = 1.0 - poisson_cdf(total_sot, line as u32);
        out.push(over_under(
            &format!("total_sot_over_{}", fmt_line(line)),
            p_over,
            cfg,
        ));
    }
    for line in [20.5, 22.5, 24.5, 26.5, 28.5, 30.5] {
        let p_over = 1.0 - poisson_cdf(total_shots, line as u32);
        out.push(over_under(
            &format!("total_shots_over_{}", fmt_line(line)),
            p_over,
            cfg,
        ));
    }
    out
}

/// The thinnest market. Expected counts combine tempo, defensive-line and
/// possession proxies with the squad multipliers, then shrink toward the
/// league average in proportion to how little history backs the team.
fn offside_markets(inputs: &MarketInputs, cfg: &ModelConfig) -> Vec<MarketPrediction> {
    let per_team_avg = cfg.league_avg_offsides / 2.0;

    let expected = |own: &TeamAggregates, opp: &TeamAggregates, home: bool, mult: f64| {
        let tempo = 0.8 + (own.goals_scored_avg / 1.5) * 0.4;
        let opp_line = 1.0 + (opp.goals_conceded_avg - 1.2) * 0.15;
        let possession = 1.2 - own.clean_sheet_rate() * 0.4;
        let home_factor = if home { cfg.home_adv_offsides } else { 1.0 };

        let raw = own.offsides_avg * tempo * possession * home_factor * opp_line * mult;
        let weight = (own.matches_played as f64 / cfg.offside_shrink_matches).min(1.0);
        (raw * weight + per_team_avg * (1.0 - weight)).clamp(0.5, 5.0)
    };

    let home = expected(
        inputs.home_agg,
        inputs.away_agg,
        true,
        inputs.squad.offsides_home_mult,
    );
    let away = expected(
        inputs.away_agg,
        inputs.home_agg,
        false,
        inputs.squad.offsides_away_mult,
    );
    let total = home + away;

    let mut out = Vec::new();
    for line in [3.5, 4.5, 5.5, 6.5] {
        let p_over = 1.0 - poisson_cdf(total, line as u32);
        out.push(over_under(
            &format!("total_offsides_over_{}", fmt_line(line)),
            p_over,
            cfg,
        ));
    }
    for (side, mean) in [("home", home), ("away", away)] {
        for line in [1.5, 2.5, 3.5] {
            let p_over = 1.0 - poisson_cdf(mean, line as u32);
            out.push(over_under(
                &format!("{side}_offsides_over_{}", fmt_line(line)),
                p_over,
                cfg,
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal_model::{GoalRateEstimate, ScoreGrid};
    use crate::signals::SquadAdjustment;

    fn book() -> Vec<MarketPrediction> {
        let cfg = ModelConfig::default();
        let est = GoalRateEstimate { home_xg: 1.6, away_xg: 1.1, rho: -0.13 };
        let grid = ScoreGrid::from_estimate(&est, &cfg);
        let ht = ScoreGrid::half_time(&est, &cfg);
        let home_agg = TeamAggregates::league_default(&cfg);
        let away_agg = TeamAggregates::league_default(&cfg);
        let squad = SquadAdjustment::neutral();
        let inputs = MarketInputs {
            home_agg: &home_agg,
            away_agg: &away_agg,
            squad: &squad,
            expected_cards: (3.8, 1.7, 2.1),
        };
        derive_markets(&grid, &ht, &inputs, &cfg)
    }

    #[test]
    fn every_market_sums_to_one_within_clip_bounds() {
        let cfg = ModelConfig::default();
        for market in book() {
            let mass: f64 = market.probs.values().sum();
            assert!(
                (mass - 1.0).abs() < 1e-6,
                "{} mass {mass}",
                market.market
            );
            for (label, p) in &market.probs {
                assert!(
                    *p >= cfg.prob_clip_lo - 1e-12 && *p <= cfg.prob_clip_hi + 1e-12,
                    "{}:{label} = {p} outside clip bounds",
                    market.market
                );
            }
        }
    }

    #[test]
    fn book_covers_all_market_families() {
        let markets: Vec<String> = book().into_iter().map(|m| m.market).collect();
        for expected in [
            "1x2",
            "total_goals_over_2.5",
            "home_goals_over_1.5",
            "btts",
            "ht_1x2",
            "ht_goals_over_0.5",
            "total_corners_over_9.5",
            "home_corners_over_4.5",
            "total_cards_over_3.5",
            "total_sot_over_8.5",
            "total_shots_over_24.5",
            "total_offsides_over_4.5",
            "away_offsides_over_1.5",
        ] {
            assert!(markets.iter().any(|m| m == expected), "missing {expected}");
        }
    }

    #[test]
    fn squad_boost_steals_from_draw_only() {
        let cfg = ModelConfig::default();
        let est = GoalRateEstimate { home_xg: 1.4, away_xg: 1.2, rho: -0.13 };
        let grid = ScoreGrid::from_estimate(&est, &cfg);

        let neutral = result_market(&grid, &SquadAdjustment::neutral(), &cfg);
        let boosted_adj = SquadAdjustment {
            result_boost_home: 0.05,
            ..SquadAdjustment::neutral()
        };
        let boosted = result_market(&grid, &boosted_adj, &cfg);

        assert!(boosted.prob("home").unwrap() > neutral.prob("home").unwrap());
        assert!(boosted.prob("draw").unwrap() < neutral.prob("draw").unwrap());
        assert!(
            (boosted.prob("away").unwrap() - neutral.prob("away").unwrap()).abs() < 1e-6
        );
        assert!(boosted.probs.values().all(|p| *p >= 0.0));
    }

    #[test]
    fn corners_spread_wider_than_poisson_at_same_mean() {
        // Overdispersion check on the actual market path: NB over-prob must
        // exceed Poisson's above the mean and undercut it below.
        let cfg = ModelConfig::default();
        let mean = 10.5;
        let nb_over_high = 1.0 - neg_binomial_cdf(mean, cfg.nb_dispersion_alpha, 14);
        let poisson_over_high = 1.0 - poisson_cdf(mean, 14);
        assert!(nb_over_high > poisson_over_high);

        let nb_over_low = 1.0 - neg_binomial_cdf(mean, cfg.nb_dispersion_alpha, 6);
        let poisson_over_low = 1.0 - poisson_cdf(mean, 6);
        assert!(nb_over_low < poisson_over_low);
    }

    #[test]
    fn card_expectation_clamps_to_configured_bounds() {
        let cfg = ModelConfig::default();
        let home_agg = TeamAggregates::league_default(&cfg);
        let away_agg = TeamAggregates::league_default(&cfg);
        let squad = SquadAdjustment::neutral();
        let book_at = |total: f64| {
            card_markets(
                &MarketInputs {
                    home_agg: &home_agg,
                    away_agg: &away_agg,
                    squad: &squad,
                    expected_cards: (total, total * 0.45, total * 0.55),
                },
                &cfg,
            )
        };

        // Anything above the ceiling collapses onto the ceiling.
        let high = book_at(12.0);
        let higher = book_at(50.0);
        let ceiling = book_at(cfg.cards_total_ceiling);
        for ((a, b), c) in high.iter().zip(&higher).zip(&ceiling) {
            assert!((a.prob("over").unwrap() - b.prob("over").unwrap()).abs() < 1e-12);
            assert!((a.prob("over").unwrap() - c.prob("over").unwrap()).abs() < 1e-12);
        }

        // And the floor holds from below.
        let low = book_at(0.2);
        let floor = book_at(cfg.cards_total_floor);
        for (a, b) in low.iter().zip(&floor) {
            assert!((a.prob("over").unwrap() - b.prob("over").unwrap()).abs() < 1e-12);
        }
    }

    #[test]
    fn aggregates_default_for_unseen_team() {
        let cfg = ModelConfig::default();
        let store = AggregateStore::new();
        let agg = store.get(777, &cfg);
        assert_eq!(agg.matches_played, 0);
        assert!((agg.corners_for_avg - cfg.league_avg_corners / 2.0).abs() < 1e-12);
    }

    #[test]
    fn aggregates_track_absorbed_fixtures() {
        let cfg = ModelConfig::default();
        let mut store = AggregateStore::new();
        let mut settled = crate::fixtures::fixture_at(1, 0);
        settled.home_goals = 2;
        settled.away_goals = 0;
        settled.aux.home_corners = Some(8);
        settled.aux.away_corners = Some(2);
        store.absorb(&settled);

        let home = store.get(settled.fixture.home_id, &cfg);
        assert_eq!(home.matches_played, 1);
        assert_eq!(home.clean_sheets, 1);
        assert!((home.corners_for_avg - 8.0).abs() < 1e-12);
        assert!((home.goals_scored_avg - 2.0).abs() < 1e-12);
    }

    #[test]
    fn more_history_means_less_offside_shrinkage() {
        let cfg = ModelConfig::default();
        let squad = SquadAdjustment::neutral();
        let mut rich = TeamAggregates::league_default(&cfg);
        rich.matches_played = 30;
        rich.offsides_avg = 4.0;
        let poor = TeamAggregates {
            offsides_avg: 4.0,
            ..TeamAggregates::league_default(&cfg)
        };
        let opp = TeamAggregates::league_default(&cfg);

        let rich_book = offside_markets(
            &MarketInputs {
                home_agg: &rich,
                away_agg: &opp,
                squad: &squad,
                expected_cards: (3.5, 1.6, 1.9),
            },
            &cfg,
        );
        let poor_book = offside_markets(
            &MarketInputs {
                home_agg: &poor,
                away_agg: &opp,
                squad: &squad,
                expected_cards: (3.5, 1.6, 1.9),
            },
            &cfg,
        );
        let over = |book: &[MarketPrediction]| {
            book.iter()
                .find(|m| m.market == "home_offsides_over_2.5")
                .and_then(|m| m.prob("over"))
                .unwrap()
        };
        // The data-rich team's 4.0 average survives shrinkage; the unseen
        // team is pulled to the 2.25 league prior.
        assert!(over(&rich_book) > over(&poor_book));
    }
}
