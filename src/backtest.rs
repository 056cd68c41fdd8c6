use std::collections::HashMap;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibrate::Calibrator;
use crate::config::ModelConfig;
use crate::fixtures::{ChronologicalFeed, Outcome, SettledFixture};
use crate::markets::AggregateStore;
use crate::predictor::Predictor;
use crate::quality::QualityGrader;
use crate::ratings::RatingStore;
use crate::signals::NoSignals;

/// One row per (fixture, market, configuration). Append-only; the unit of
/// analysis for the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub fixture_id: u64,
    pub league_id: u32,
    pub config: String,
    pub market: String,
    /// Modal outcome label at prediction time.
    pub pick: String,
    /// Probability assigned to the pick.
    pub predicted: f64,
    /// Label that actually happened.
    pub realized: String,
    pub hit: bool,
    pub confidence: f64,
    /// Bookmaker odds for the pick, when the caller supplied them. Records
    /// without odds are excluded from ROI and Sharpe.
    pub odds: Option<f64>,
}

/// Bookmaker odds lookup for one pick. Like the signal providers this is a
/// pluggable read-only seam: absent odds mean the pick cannot be staked, but
/// it still counts toward accuracy, Brier and log loss.
pub trait OddsProvider {
    fn odds(&self, fixture_id: u64, market: &str, pick: &str) -> Option<f64>;
}

/// No bookmaker feed attached; every pick goes unstaked.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOdds;

impl OddsProvider for NoOdds {
    fn odds(&self, _fixture_id: u64, _market: &str, _pick: &str) -> Option<f64> {
        None
    }
}

/// The canonical outcome whose realised indicator drives calibration and the
/// cross-market correlation vectors.
pub fn canonical_outcome(market: &str) -> &'static str {
    if market == "1x2" || market == "ht_1x2" {
        "home"
    } else if market == "btts" {
        "yes"
    } else {
        "over"
    }
}

fn parse_line(market: &str) -> Option<f64> {
    market.rsplit('_').next()?.parse().ok()
}

fn over_under_label(count: Option<u32>, line: f64) -> Option<String> {
    let count = count?;
    Some(if count as f64 > line { "over".into() } else { "under".into() })
}

fn outcome_label(outcome: Outcome) -> String {
    match outcome {
        Outcome::Home => "home".into(),
        Outcome::Draw => "draw".into(),
        Outcome::Away => "away".into(),
    }
}

/// Ground truth for one market from a settled fixture. None when the needed
/// auxiliary count is missing, in which case the market is skipped for that
/// fixture.
pub fn realized_outcome(market: &str, settled: &SettledFixture) -> Option<String> {
    let aux = &settled.aux;
    match market {
        "1x2" => return Some(outcome_label(settled.outcome())),
        "ht_1x2" => return aux.ht_outcome().map(outcome_label),
        "btts" => {
            let yes = settled.home_goals > 0 && settled.away_goals > 0;
            return Some(if yes { "yes".into() } else { "no".into() });
        }
        _ => {}
    }

    let line = parse_line(market)?;
    let total_goals = settled.home_goals + settled.away_goals;
    let ht_total = aux.ht_home_goals.and_then(|h| aux.ht_away_goals.map(|a| h + a));

    if market.starts_with("total_goals_over_") {
        return over_under_label(Some(total_goals), line);
    }
    if market.starts_with("home_goals_over_") {
        return over_under_label(Some(settled.home_goals), line);
    }
    if market.starts_with("away_goals_over_") {
        return over_under_label(Some(settled.away_goals), line);
    }
    if market.starts_with("ht_goals_over_") {
        return over_under_label(ht_total, line);
    }
    if market.starts_with("total_corners_over_") {
        return over_under_label(aux.total_corners(), line);
    }
    if market.starts_with("home_corners_over_") {
        return over_under_label(aux.home_corners, line);
    }
    if market.starts_with("away_corners_over_") {
        return over_under_label(aux.away_corners, line);
    }
    if market.starts_with("total_cards_over_") {
        return over_under_label(aux.total_cards(), line);
    }
    if market.starts_with("total_sot_over_") {
        return over_under_label(aux.total_shots_on_target(), line);
    }
    if market.starts_with("total_shots_over_") {
        return over_under_label(aux.total_shots(), line);
    }
    if market.starts_with("total_offsides_over_") {
        return over_under_label(aux.total_offsides(), line);
    }
    if market.starts_with("home_offsides_over_") {
        return over_under_label(aux.home_offsides, line);
    }
    if market.starts_with("away_offsides_over_") {
        return over_under_label(aux.away_offsides, line);
    }
    None
}

// Refitting calibration every fixture would be quadratic; this cadence keeps
// the maps fresh enough.
const REFIT_EVERY: usize = 25;

/// Walk-forward replay of one labelled configuration over the feed. Every
/// prediction uses only state built from strictly earlier fixtures.
fn run_config<O: OddsProvider>(
    label: &str,
    cfg: &ModelConfig,
    feed: &ChronologicalFeed,
    odds: &O,
) -> Result<Vec<BacktestRecord>> {
    let mut store = RatingStore::new(cfg.clone());
    let mut aggregates = AggregateStore::new();
    let mut calibrator = Calibrator::new();
    let mut grader = QualityGrader::new();
    let leagues = HashMap::new();

    let mut records = Vec::new();
    let mut seen = 0usize;

    store.try_replay_with(feed, |store, settled| -> Result<()> {
        let predictor = Predictor {
            store,
            aggregates: &aggregates,
            leagues: &leagues,
            calibrator: &calibrator,
            grader: &grader,
            squads: &NoSignals,
            referees: &NoSignals,
            cfg,
        };
        let set = predictor.predict(&settled.fixture)?;

        for market in &set.markets {
            let Some(realized) = realized_outcome(&market.market, settled) else {
                continue;
            };
            let Some((pick, predicted)) = market.pick() else {
                continue;
            };
            let hit = pick == realized;

            let canonical = canonical_outcome(&market.market);
            if let Some(p_canonical) = market.prob(canonical) {
                calibrator.observe(
                    settled.fixture.league_id,
                    &market.market,
                    p_canonical,
                    realized == canonical,
                );
            }
            grader.record(settled.fixture.league_id, &market.market, predicted, hit);

            records.push(BacktestRecord {
                fixture_id: settled.fixture.id,
                league_id: settled.fixture.league_id,
                config: label.to_string(),
                market: market.market.clone(),
                pick: pick.to_string(),
                predicted,
                realized,
                hit,
                confidence: market.confidence,
                odds: odds.odds(settled.fixture.id, &market.market, pick),
            });
        }

        aggregates.absorb(settled);
        seen += 1;
        if seen % REFIT_EVERY == 0 {
            calibrator.refit(cfg);
        }
        Ok(())
    })?;

    info!(config = label, records = records.len(), "backtest config finished");
    Ok(records)
}

/// Replays the same feed through a baseline and a candidate configuration.
/// The two runs are independent, each owning its own stores, so they go
/// through rayon; record order stays deterministic (baseline first).
pub struct BacktestRunner {
    pub baseline: ModelConfig,
    pub candidate: ModelConfig,
}

impl BacktestRunner {
    pub fn new(baseline: ModelConfig, candidate: ModelConfig) -> Self {
        Self { baseline, candidate }
    }

    pub fn run(&self, feed: &ChronologicalFeed) -> Result<Vec<BacktestRecord>> {
        self.run_with_odds(feed, &NoOdds)
    }

    /// Same replay with a bookmaker odds source attached, so the evaluator's
    /// ROI and Sharpe columns have stakes to work with.
    pub fn run_with_odds<O: OddsProvider + Sync>(
        &self,
        feed: &ChronologicalFeed,
        odds: &O,
    ) -> Result<Vec<BacktestRecord>> {
        if feed.is_empty() {
            return Err(anyhow!("backtest feed is empty"));
        }
        let configs = [("baseline", &self.baseline), ("candidate", &self.candidate)];
        let per_config: Vec<Result<Vec<BacktestRecord>>> = configs
            .par_iter()
            .map(|(label, cfg)| run_config(label, cfg, feed, odds))
            .collect();

        let mut records = Vec::new();
        for result in per_config {
            records.extend(result?);
        }
        Ok(records)
    }
}
