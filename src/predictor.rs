use std::collections::HashMap;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibrate::Calibrator;
use crate::config::ModelConfig;
use crate::fixtures::Fixture;
use crate::goal_model::{GoalRateEstimate, ScoreGrid, estimate_goal_rates};
use crate::league_params::LeagueParams;
use crate::markets::{AggregateStore, MarketInputs, MarketPrediction, derive_markets};
use crate::quality::QualityGrader;
use crate::ratings::RatingStore;
use crate::signals::{
    RefereeProfile, RefereeProvider, SquadAdjustment, SquadProvider, expected_cards,
};

/// The complete market book for one fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSet {
    pub fixture_id: u64,
    pub goal_rates: GoalRateEstimate,
    pub markets: Vec<MarketPrediction>,
}

impl PredictionSet {
    pub fn market(&self, key: &str) -> Option<&MarketPrediction> {
        self.markets.iter().find(|m| m.market == key)
    }
}

/// Prediction façade over the replayed state. `predict` is a pure function
/// of the store snapshot and read-only signals, so independent fixtures can
/// be predicted in parallel.
pub struct Predictor<'a, S, R> {
    pub store: &'a RatingStore,
    pub aggregates: &'a AggregateStore,
    pub leagues: &'a HashMap<u32, LeagueParams>,
    pub calibrator: &'a Calibrator,
    pub grader: &'a QualityGrader,
    pub squads: &'a S,
    pub referees: &'a R,
    pub cfg: &'a ModelConfig,
}

impl<'a, S: SquadProvider, R: RefereeProvider> Predictor<'a, S, R> {
    /// Either a complete, internally consistent book, or an error. Never a
    /// partial set.
    pub fn predict(&self, fixture: &Fixture) -> Result<PredictionSet> {
        ensure!(
            fixture.home_id != fixture.away_id,
            "fixture {} pits team {} against itself",
            fixture.id,
            fixture.home_id
        );

        let league = self
            .leagues
            .get(&fixture.league_id)
            .cloned()
            .unwrap_or_else(|| LeagueParams::defaults(fixture.league_id));

        let est = estimate_goal_rates(self.store, fixture, &league, self.cfg);
        let grid = ScoreGrid::from_estimate(&est, self.cfg);
        let ht_grid = ScoreGrid::half_time(&est, self.cfg);

        let home_agg = self.aggregates.get(fixture.home_id, self.cfg);
        let away_agg = self.aggregates.get(fixture.away_id, self.cfg);

        let squad = self.squad_adjustment(fixture);
        let referee = self.referee_profile(fixture);
        let cards = expected_cards(
            &referee,
            home_agg.fouls_avg,
            away_agg.fouls_avg,
            fixture.is_derby,
            fixture.importance,
            self.cfg,
        );

        let inputs = MarketInputs {
            home_agg: &home_agg,
            away_agg: &away_agg,
            squad: &squad,
            expected_cards: cards,
        };
        let mut markets = derive_markets(&grid, &ht_grid, &inputs, self.cfg);

        // Coverage from how much history backs each side.
        let coverage = |m: u32| (m as f64 / 10.0).min(1.0);
        let data_coverage =
            (coverage(home_agg.matches_played) + coverage(away_agg.matches_played)) / 2.0;

        for market in &mut markets {
            self.calibrate_market(fixture.league_id, market);
            market.grade = self.grader.grade(
                fixture.league_id,
                &market.market,
                data_coverage,
                market.confidence,
                self.cfg,
            );
        }

        debug!(
            fixture = fixture.id,
            home_xg = est.home_xg,
            away_xg = est.away_xg,
            markets = markets.len(),
            "prediction built"
        );

        Ok(PredictionSet {
            fixture_id: fixture.id,
            goal_rates: est,
            markets,
        })
    }

    fn squad_adjustment(&self, fixture: &Fixture) -> SquadAdjustment {
        if !self.cfg.use_squad_quality {
            return SquadAdjustment::neutral();
        }
        let home = self.squads.squad_profile(&fixture.home_name);
        let away = self.squads.squad_profile(&fixture.away_name);
        match (home, away) {
            (Some(h), Some(a)) => SquadAdjustment::from_profiles(&h, &a, self.cfg),
            _ => {
                debug!(fixture = fixture.id, "squad profiles missing, neutral adjustment");
                SquadAdjustment::neutral()
            }
        }
    }

    fn referee_profile(&self, fixture: &Fixture) -> RefereeProfile {
        if !self.cfg.use_referee_profile {
            return RefereeProfile::default();
        }
        fixture
            .referee
            .as_deref()
            .and_then(|name| self.referees.referee_profile(name))
            .unwrap_or_default()
    }

    /// Calibrates each outcome, renormalises, and records the coarsest
    /// fallback level that was needed.
    fn calibrate_market(&self, league_id: u32, market: &mut MarketPrediction) {
        let mut fallback: Option<String> = None;
        for p in market.probs.values_mut() {
            let (calibrated, level) = self.calibrator.calibrate(league_id, &market.market, *p);
            *p = calibrated;
            if let Some(level) = level {
                // identity is coarser than market-global
                if fallback.as_deref() != Some("identity") {
                    fallback = Some(level);
                }
            }
        }
        crate::markets::clip_and_renormalise(&mut market.probs, self.cfg);
        market.confidence = market.probs.values().copied().fold(0.0, f64::max);
        market.fallback = fallback;
    }
}
