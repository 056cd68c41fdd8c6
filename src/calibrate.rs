use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;

/// Monotone non-decreasing map from raw to calibrated probability, fitted by
/// pooled-adjacent-violators over binned (predicted, realised) pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationMap {
    /// Bin centres, strictly increasing.
    xs: Vec<f64>,
    /// Calibrated values at each centre, non-decreasing after pooling.
    ys: Vec<f64>,
}

impl CalibrationMap {
    pub fn identity() -> Self {
        Self {
            xs: vec![0.0, 1.0],
            ys: vec![0.0, 1.0],
        }
    }

    /// Bins the pairs by predicted probability, takes each bin's realised
    /// frequency, then pools adjacent violators until the sequence is
    /// non-decreasing. Returns None when every bin is empty.
    pub fn fit(pairs: &[(f64, f64)], bins: usize) -> Option<Self> {
        let bins = bins.max(2);
        let mut sums = vec![0.0; bins];
        let mut preds = vec![0.0; bins];
        let mut counts = vec![0usize; bins];
        for (p, y) in pairs {
            let idx = ((p * bins as f64) as usize).min(bins - 1);
            sums[idx] += y;
            preds[idx] += p;
            counts[idx] += 1;
        }

        // Blocks of (mean predicted, mean realised, weight).
        let mut blocks: Vec<(f64, f64, f64)> = (0..bins)
            .filter(|i| counts[*i] > 0)
            .map(|i| {
                let n = counts[i] as f64;
                (preds[i] / n, sums[i] / n, n)
            })
            .collect();
        if blocks.is_empty() {
            return None;
        }

        // Pool adjacent violators: merge any block whose value drops below
        // its predecessor into a weighted block, repeating until monotone.
        let mut i = 0;
        while i + 1 < blocks.len() {
            if blocks[i + 1].1 < blocks[i].1 {
                let (x1, y1, w1) = blocks[i];
                let (x2, y2, w2) = blocks[i + 1];
                let w = w1 + w2;
                blocks[i] = ((x1 * w1 + x2 * w2) / w, (y1 * w1 + y2 * w2) / w, w);
                blocks.remove(i + 1);
                if i > 0 {
                    i -= 1;
                }
            } else {
                i += 1;
            }
        }

        let xs: Vec<f64> = blocks.iter().map(|b| b.0).collect();
        let ys: Vec<f64> = blocks.iter().map(|b| b.1).collect();
        Some(Self { xs, ys })
    }

    /// Piecewise-linear interpolation, flat beyond the fitted range.
    pub fn apply(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        if self.xs.is_empty() {
            return p;
        }
        if p <= self.xs[0] {
            return self.ys[0];
        }
        if p >= self.xs[self.xs.len() - 1] {
            return self.ys[self.ys.len() - 1];
        }
        for i in 1..self.xs.len() {
            if p <= self.xs[i] {
                let t = (p - self.xs[i - 1]) / (self.xs[i] - self.xs[i - 1]);
                return self.ys[i - 1] + t * (self.ys[i] - self.ys[i - 1]);
            }
        }
        self.ys[self.ys.len() - 1]
    }
}

const WINDOW: usize = 500;

/// Per-(league, market) calibration on a rolling window. Thin slices fall
/// back to the market-wide map, then to identity, and the fallback level is
/// reported so predictions stay auditable.
#[derive(Debug, Default)]
pub struct Calibrator {
    samples: HashMap<(u32, String), VecDeque<(f64, f64)>>,
    league_maps: HashMap<(u32, String), CalibrationMap>,
    global_maps: HashMap<String, CalibrationMap>,
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, league_id: u32, market: &str, predicted: f64, realised: bool) {
        let window = self
            .samples
            .entry((league_id, market.to_string()))
            .or_default();
        window.push_back((predicted, if realised { 1.0 } else { 0.0 }));
        while window.len() > WINDOW {
            window.pop_front();
        }
    }

    /// Refits every map from the current windows.
    pub fn refit(&mut self, cfg: &ModelConfig) {
        self.league_maps.clear();
        self.global_maps.clear();

        let mut by_market: HashMap<String, Vec<(f64, f64)>> = HashMap::new();
        for ((league_id, market), window) in &self.samples {
            let pairs: Vec<(f64, f64)> = window.iter().copied().collect();
            by_market
                .entry(market.clone())
                .or_default()
                .extend_from_slice(&pairs);
            if pairs.len() >= cfg.calibration_min_samples {
                if let Some(map) = CalibrationMap::fit(&pairs, cfg.calibration_bins) {
                    self.league_maps.insert((*league_id, market.clone()), map);
                }
            }
        }
        for (market, pairs) in by_market {
            if pairs.len() >= cfg.calibration_min_samples {
                if let Some(map) = CalibrationMap::fit(&pairs, cfg.calibration_bins) {
                    self.global_maps.insert(market, map);
                }
            }
        }
        debug!(
            league_maps = self.league_maps.len(),
            global_maps = self.global_maps.len(),
            "calibration maps refitted"
        );
    }

    /// Calibrated probability plus the fallback level used, if any.
    pub fn calibrate(&self, league_id: u32, market: &str, p: f64) -> (f64, Option<String>) {
        if let Some(map) = self.league_maps.get(&(league_id, market.to_string())) {
            return (map.apply(p), None);
        }
        if let Some(map) = self.global_maps.get(market) {
            return (map.apply(p), Some("market-global".to_string()));
        }
        (p, Some("identity".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overconfident_pairs(n: usize) -> Vec<(f64, f64)> {
        // Predictions spread over [0,1]; the realised rate is squashed
        // toward 0.5, the classic overconfidence shape.
        (0..n)
            .map(|i| {
                let p = i as f64 / (n - 1) as f64;
                let realised = if 0.25 + 0.5 * p > (i % 10) as f64 / 10.0 {
                    1.0
                } else {
                    0.0
                };
                (p, realised)
            })
            .collect()
    }

    #[test]
    fn fitted_map_is_monotone() {
        let map = CalibrationMap::fit(&overconfident_pairs(200), 10).unwrap();
        let mut prev = 0.0;
        for i in 0..=100 {
            let out = map.apply(i as f64 / 100.0);
            assert!(out >= prev - 1e-12, "map decreased at {i}");
            prev = out;
        }
    }

    #[test]
    fn identity_map_is_identity() {
        let map = CalibrationMap::identity();
        for p in [0.0, 0.2, 0.5, 0.77, 1.0] {
            assert!((map.apply(p) - p).abs() < 1e-12);
        }
    }

    #[test]
    fn pav_pools_violating_bins() {
        // Second bin lower than first: both pool into one block whose value
        // is the weighted mean, centred between the two bins.
        let pairs = vec![
            (0.05, 1.0),
            (0.05, 1.0),
            (0.15, 0.0),
            (0.15, 0.0),
            (0.85, 1.0),
            (0.85, 1.0),
        ];
        let map = CalibrationMap::fit(&pairs, 10).unwrap();
        assert!((map.apply(0.10) - 0.5).abs() < 1e-9, "violators not pooled");

        // Interpolation across the pooled block never dips: the raw 1.0 bin
        // no longer outranks the raw 0.0 bin.
        let low = map.apply(0.05);
        let mid = map.apply(0.15);
        assert!(mid >= low - 1e-12, "pooling broke monotonicity");
        assert!(map.apply(0.85) >= mid);
    }

    #[test]
    fn thin_slice_falls_back_with_label() {
        let cfg = ModelConfig::default();
        let mut cal = Calibrator::new();
        // League 61 has too few samples; league 39 carries the market-wide
        // weight.
        for i in 0..100 {
            cal.observe(39, "1x2", (i % 10) as f64 / 10.0, i % 2 == 0);
        }
        for i in 0..5 {
            cal.observe(61, "1x2", 0.5, i % 2 == 0);
        }
        cal.refit(&cfg);

        let (_, fallback_rich) = cal.calibrate(39, "1x2", 0.6);
        assert_eq!(fallback_rich, None);
        let (_, fallback_thin) = cal.calibrate(61, "1x2", 0.6);
        assert_eq!(fallback_thin.as_deref(), Some("market-global"));
        let (p, fallback_unknown) = cal.calibrate(94, "btts", 0.6);
        assert_eq!(fallback_unknown.as_deref(), Some("identity"));
        assert!((p - 0.6).abs() < 1e-12);
    }
}
