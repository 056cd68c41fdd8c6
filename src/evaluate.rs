use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestRecord, canonical_outcome};
use crate::config::ModelConfig;
use crate::dist::pearson;

const LOG_LOSS_EPS: f64 = 1e-12;

/// Per-(configuration, market) summary metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub brier: f64,
    pub log_loss: f64,
    /// Percent return over staked, on picks passing the confidence and edge
    /// thresholds. Zero when no record carried odds.
    pub roi: f64,
    pub sharpe: f64,
    pub bets_placed: usize,
}

fn metrics_for(records: &[&BacktestRecord], cfg: &ModelConfig) -> MarketMetrics {
    let n = records.len();
    if n == 0 {
        return MarketMetrics::default();
    }

    let mut hits = 0usize;
    let mut brier = 0.0;
    let mut log_loss = 0.0;
    for r in records {
        let y = if r.hit { 1.0 } else { 0.0 };
        hits += r.hit as usize;
        brier += (r.predicted - y).powi(2);
        let p = r.predicted.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
        log_loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
    }

    // Fixed-stake simulation over qualifying picks. Records without odds
    // can't be staked and are skipped, matching how the metrics read when a
    // bookmaker feed is absent.
    let mut staked = 0.0;
    let mut returned = 0.0;
    let mut returns = Vec::new();
    for r in records {
        let Some(odds) = r.odds else { continue };
        let edge = r.predicted * odds - 1.0;
        if r.confidence >= cfg.roi_min_confidence && edge >= cfg.roi_min_edge {
            staked += 1.0;
            let bet_return = if r.hit {
                returned += odds;
                odds - 1.0
            } else {
                -1.0
            };
            returns.push(bet_return);
        }
    }
    let roi = if staked > 0.0 {
        (returned - staked) / staked * 100.0
    } else {
        0.0
    };
    let sharpe = sharpe_ratio(&returns);

    MarketMetrics {
        samples: n,
        accuracy: hits as f64 / n as f64,
        brier: brier / n as f64,
        log_loss: log_loss / n as f64,
        roi,
        sharpe,
        bets_placed: returns.len(),
    }
}

fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    if var <= 0.0 {
        return 0.0;
    }
    mean / var.sqrt()
}

/// Symmetric market-pair correlation with a unit diagonal, recomputed
/// wholesale from a batch of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub markets: Vec<String>,
    values: BTreeMap<String, f64>,
}

fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

impl CorrelationMatrix {
    /// Correlates the realised canonical-outcome indicators of every market
    /// pair, aligned by fixture. Pairs with fewer than two shared fixtures
    /// are left out.
    pub fn compute(records: &[BacktestRecord]) -> Self {
        let mut by_market: HashMap<&str, BTreeMap<u64, f64>> = HashMap::new();
        for r in records {
            let indicator = if r.realized == canonical_outcome(&r.market) {
                1.0
            } else {
                0.0
            };
            by_market
                .entry(r.market.as_str())
                .or_default()
                .insert(r.fixture_id, indicator);
        }

        let mut markets: Vec<String> = by_market.keys().map(|m| m.to_string()).collect();
        markets.sort();

        let mut values = BTreeMap::new();
        for (i, a) in markets.iter().enumerate() {
            for b in markets.iter().skip(i + 1) {
                let va = &by_market[a.as_str()];
                let vb = &by_market[b.as_str()];
                let mut xs = Vec::new();
                let mut ys = Vec::new();
                for (fixture, x) in va {
                    if let Some(y) = vb.get(fixture) {
                        xs.push(*x);
                        ys.push(*y);
                    }
                }
                if xs.len() >= 2 {
                    values.insert(pair_key(a, b), pearson(&xs, &ys));
                }
            }
        }

        Self { markets, values }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        self.values.get(&pair_key(a, b)).copied()
    }

    /// Pairs whose |r| exceeds the threshold, strongest first.
    pub fn flagged_pairs(&self, threshold: f64) -> Vec<(String, String, f64)> {
        let mut out: Vec<(String, String, f64)> = self
            .values
            .iter()
            .filter(|(_, r)| r.abs() > threshold)
            .filter_map(|(key, r)| {
                let (a, b) = key.split_once('|')?;
                Some((a.to_string(), b.to_string(), *r))
            })
            .collect();
        out.sort_by(|x, y| y.2.abs().total_cmp(&x.2.abs()));
        out
    }

    /// Lowest-|r| pairs, for building combinations that are close to
    /// independent.
    pub fn least_correlated_pairs(&self, n: usize) -> Vec<(String, String, f64)> {
        let mut out: Vec<(String, String, f64)> = self
            .values
            .iter()
            .filter_map(|(key, r)| {
                let (a, b) = key.split_once('|')?;
                Some((a.to_string(), b.to_string(), *r))
            })
            .collect();
        out.sort_by(|x, y| x.2.abs().total_cmp(&y.2.abs()));
        out.truncate(n);
        out
    }
}

/// Candidate-minus-baseline comparison for one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub market: String,
    pub accuracy_delta: f64,
    pub brier_delta: f64,
    pub log_loss_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// config -> market -> metrics.
    pub metrics: BTreeMap<String, BTreeMap<String, MarketMetrics>>,
    pub deltas: Vec<MetricDelta>,
    pub correlation: CorrelationMatrix,
    pub flagged_pairs: Vec<(String, String, f64)>,
}

impl BacktestReport {
    pub fn build(records: &[BacktestRecord], cfg: &ModelConfig) -> Self {
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<&BacktestRecord>>> =
            BTreeMap::new();
        for r in records {
            grouped
                .entry(r.config.clone())
                .or_default()
                .entry(r.market.clone())
                .or_default()
                .push(r);
        }

        let mut metrics: BTreeMap<String, BTreeMap<String, MarketMetrics>> = BTreeMap::new();
        for (config, markets) in &grouped {
            let table = markets
                .iter()
                .map(|(market, recs)| (market.clone(), metrics_for(recs, cfg)))
                .collect();
            metrics.insert(config.clone(), table);
        }

        let mut deltas = Vec::new();
        if let (Some(baseline), Some(candidate)) =
            (metrics.get("baseline"), metrics.get("candidate"))
        {
            for (market, cand) in candidate {
                if let Some(base) = baseline.get(market) {
                    deltas.push(MetricDelta {
                        market: market.clone(),
                        accuracy_delta: cand.accuracy - base.accuracy,
                        brier_delta: cand.brier - base.brier,
                        log_loss_delta: cand.log_loss - base.log_loss,
                    });
                }
            }
        }

        // Correlation reflects outcome structure, not model choice; the
        // candidate's records carry it.
        let candidate_records: Vec<BacktestRecord> = records
            .iter()
            .filter(|r| r.config == "candidate")
            .cloned()
            .collect();
        let source = if candidate_records.is_empty() {
            records
        } else {
            &candidate_records[..]
        };
        let correlation = CorrelationMatrix::compute(source);
        let flagged_pairs = correlation.flagged_pairs(cfg.parlay_high_correlation);

        Self {
            metrics,
            deltas,
            correlation,
            flagged_pairs,
        }
    }
}
