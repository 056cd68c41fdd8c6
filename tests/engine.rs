use std::collections::HashMap;

use chrono::{TimeZone, Utc};

use parlay_engine::calibrate::Calibrator;
use parlay_engine::config::ModelConfig;
use parlay_engine::dataset::synthetic_feed;
use parlay_engine::fixtures::{Fixture, MatchImportance};
use parlay_engine::goal_model::{estimate_from_ratings, ScoreGrid};
use parlay_engine::league_params::LeagueParams;
use parlay_engine::markets::AggregateStore;
use parlay_engine::predictor::Predictor;
use parlay_engine::quality::QualityGrader;
use parlay_engine::ratings::RatingStore;
use parlay_engine::signals::NoSignals;

fn upcoming_fixture(league_id: u32, home_id: u32, away_id: u32) -> Fixture {
    Fixture {
        id: 900_000,
        league_id,
        kickoff: Utc.with_ymd_and_hms(2025, 5, 1, 15, 0, 0).unwrap(),
        home_id,
        away_id,
        home_name: format!("Team {home_id}"),
        away_name: format!("Team {away_id}"),
        referee: None,
        venue: None,
        is_derby: false,
        importance: MatchImportance::Normal,
    }
}

#[test]
fn rating_gap_with_home_advantage_drives_expected_goals() {
    let cfg = ModelConfig::default();
    let mut league = LeagueParams::defaults(39);
    league.dc_rho = -0.15;

    let est = estimate_from_ratings(1650.0, 1450.0, 70.0, &league, &cfg);
    assert!(est.home_xg > est.away_xg);

    let grid = ScoreGrid::build(est.home_xg, est.away_xg, est.rho, cfg.max_goals, true);
    let (home, draw, away) = grid.result_probs();
    assert!((home + draw + away - 1.0).abs() < 1e-6);
    assert!(home > away, "200-point favourite at home must be favourite");
}

#[test]
fn full_book_after_replay_is_consistent() {
    let cfg = ModelConfig::default();
    let feed = synthetic_feed(14, 26, 39, 17);

    let mut store = RatingStore::new(cfg.clone());
    let mut aggregates = AggregateStore::new();
    store.replay(&feed);
    for settled in feed.iter() {
        aggregates.absorb(settled);
    }

    let leagues = HashMap::new();
    let calibrator = Calibrator::new();
    let grader = QualityGrader::new();
    let predictor = Predictor {
        store: &store,
        aggregates: &aggregates,
        leagues: &leagues,
        calibrator: &calibrator,
        grader: &grader,
        squads: &NoSignals,
        referees: &NoSignals,
        cfg: &cfg,
    };

    let set = predictor.predict(&upcoming_fixture(39, 1, 2)).unwrap();
    assert!(set.markets.len() > 30);
    for market in &set.markets {
        let mass: f64 = market.probs.values().sum();
        assert!(
            (mass - 1.0).abs() < 1e-6,
            "{} mass off: {mass}",
            market.market
        );
        for (label, p) in &market.probs {
            assert!(
                *p >= cfg.prob_clip_lo - 1e-12 && *p <= cfg.prob_clip_hi + 1e-12,
                "{}:{} = {} outside clip bounds",
                market.market,
                label,
                p
            );
        }
    }
}

#[test]
fn prediction_is_pure_function_of_snapshot() {
    let cfg = ModelConfig::default();
    let feed = synthetic_feed(10, 12, 39, 5);
    let mut store = RatingStore::new(cfg.clone());
    let mut aggregates = AggregateStore::new();
    store.replay(&feed);
    for settled in feed.iter() {
        aggregates.absorb(settled);
    }
    let leagues = HashMap::new();
    let calibrator = Calibrator::new();
    let grader = QualityGrader::new();
    let predictor = Predictor {
        store: &store,
        aggregates: &aggregates,
        leagues: &leagues,
        calibrator: &calibrator,
        grader: &grader,
        squads: &NoSignals,
        referees: &NoSignals,
        cfg: &cfg,
    };

    let fixture = upcoming_fixture(39, 3, 4);
    let a = predictor.predict(&fixture).unwrap();
    let b = predictor.predict(&fixture).unwrap();
    assert_eq!(a.markets.len(), b.markets.len());
    for (ma, mb) in a.markets.iter().zip(b.markets.iter()) {
        assert_eq!(ma.market, mb.market);
        for (label, p) in &ma.probs {
            assert!((p - mb.probs[label]).abs() < 1e-15);
        }
    }
}
