use parlay_engine::backtest::BacktestRunner;
use parlay_engine::config::ModelConfig;
use parlay_engine::dataset::synthetic_feed;
use parlay_engine::evaluate::{BacktestReport, CorrelationMatrix};
use parlay_engine::parlay::{ParlaySelection, ParlayValidator, ParlayVerdict};

fn leg(fixture_id: u64, market: &str, pick: &str, odds: f64) -> ParlaySelection {
    ParlaySelection {
        fixture_id,
        market: market.to_string(),
        pick: pick.to_string(),
        odds,
    }
}

#[test]
fn backtest_report_end_to_end() {
    let cfg = ModelConfig::default();
    let feed = synthetic_feed(12, 24, 39, 23);
    let runner = BacktestRunner::new(ModelConfig::baseline(), cfg.clone());
    let records = runner.run(&feed).unwrap();
    assert!(!records.is_empty());

    let report = BacktestReport::build(&records, &cfg);

    // Both configurations produce per-market tables with sane metric ranges.
    for config in ["baseline", "candidate"] {
        let table = report.metrics.get(config).unwrap();
        assert!(table.contains_key("1x2"));
        assert!(table.contains_key("total_goals_over_2.5"));
        for (market, m) in table {
            assert!(m.samples > 0, "{config}/{market} has no samples");
            assert!((0.0..=1.0).contains(&m.accuracy));
            assert!((0.0..=1.0).contains(&m.brier), "{config}/{market} brier {}", m.brier);
            assert!(m.log_loss >= 0.0);
        }
    }
    assert!(!report.deltas.is_empty());

    // Matrix symmetry and unit diagonal over fitted markets.
    let matrix = &report.correlation;
    for a in &matrix.markets {
        assert_eq!(matrix.get(a, a), Some(1.0));
        for b in &matrix.markets {
            assert_eq!(matrix.get(a, b), matrix.get(b, a));
            if let Some(r) = matrix.get(a, b) {
                assert!((-1.0..=1.0).contains(&r));
            }
        }
    }

    // Adjacent goal totals come out strongly related on real outcomes.
    if let Some(r) = matrix.get("total_goals_over_2.5", "total_goals_over_3.5") {
        assert!(r > 0.3, "adjacent total lines should correlate, r={r}");
    }
}

#[test]
fn rerun_produces_identical_report() {
    let cfg = ModelConfig::default();
    let feed = synthetic_feed(10, 16, 39, 31);
    let runner = BacktestRunner::new(ModelConfig::baseline(), cfg.clone());

    let first = serde_json::to_string(&BacktestReport::build(&runner.run(&feed).unwrap(), &cfg))
        .unwrap();
    let second = serde_json::to_string(&BacktestReport::build(&runner.run(&feed).unwrap(), &cfg))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn fitted_matrix_feeds_parlay_validation() {
    let cfg = ModelConfig::default();
    let feed = synthetic_feed(14, 30, 39, 41);
    let runner = BacktestRunner::new(ModelConfig::baseline(), cfg.clone());
    let records = runner.run(&feed).unwrap();
    let candidate: Vec<_> = records
        .into_iter()
        .filter(|r| r.config == "candidate")
        .collect();
    let matrix = CorrelationMatrix::compute(&candidate);
    let validator = ParlayValidator::new(&matrix, &cfg);

    // Tightly coupled totals on the same fixture never pass clean.
    let coupled = validator.validate(&[
        leg(3, "total_goals_over_0.5", "over", 1.2),
        leg(3, "total_goals_over_1.5", "over", 1.5),
    ]);
    assert_ne!(coupled.verdict, ParlayVerdict::Accept);

    // The same legs across different fixtures are independent.
    let split = validator.validate(&[
        leg(3, "total_goals_over_0.5", "over", 1.2),
        leg(4, "total_goals_over_1.5", "over", 1.5),
    ]);
    assert_eq!(split.verdict, ParlayVerdict::Accept);
    assert!((split.adjusted_combined_odds - 1.2 * 1.5).abs() < 1e-12);
}
