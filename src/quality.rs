use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Grade::A
        } else if score >= 0.60 {
            Grade::B
        } else if score >= 0.45 {
            Grade::C
        } else if score >= 0.30 {
            Grade::D
        } else {
            Grade::F
        }
    }

    fn downgraded(self) -> Self {
        match self {
            Grade::A => Grade::B,
            Grade::B => Grade::C,
            Grade::C => Grade::D,
            Grade::D | Grade::F => Grade::F,
        }
    }
}

const TRAILING_KEPT: usize = 100;

#[derive(Debug, Default, Clone)]
struct Trailing {
    hits: VecDeque<bool>,
    calibration_gap: VecDeque<f64>,
}

/// Grades a prediction from data coverage, model confidence and the trailing
/// accuracy of the same (league, market) slice.
#[derive(Debug, Default)]
pub struct QualityGrader {
    trailing: HashMap<(u32, String), Trailing>,
}

impl QualityGrader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weighted score over the three components, then the threshold grade.
    /// A slice whose trailing accuracy or calibration error has gone bad is
    /// downgraded one step regardless of the point score.
    pub fn grade(
        &self,
        league_id: u32,
        market: &str,
        data_coverage: f64,
        confidence: f64,
        cfg: &ModelConfig,
    ) -> Grade {
        let key = (league_id, market.to_string());
        let trailing = self.trailing.get(&key);

        let accuracy = trailing
            .filter(|t| !t.hits.is_empty())
            .map(|t| t.hits.iter().filter(|h| **h).count() as f64 / t.hits.len() as f64)
            .unwrap_or(0.5);

        let score = 0.35 * data_coverage.clamp(0.0, 1.0)
            + 0.40 * confidence.clamp(0.0, 1.0)
            + 0.25 * accuracy;
        let mut grade = Grade::from_score(score);

        if let Some(t) = trailing {
            let enough = t.hits.len() >= 10;
            let cal_error = if t.calibration_gap.is_empty() {
                0.0
            } else {
                t.calibration_gap.iter().sum::<f64>() / t.calibration_gap.len() as f64
            };
            if enough && (accuracy < cfg.grade_bad_accuracy || cal_error > cfg.grade_bad_calibration_error)
            {
                grade = grade.downgraded();
            }
        }
        grade
    }

    /// Records a settled pick for the slice's trailing window: whether the
    /// modal outcome was right, and the gap between predicted probability
    /// and the realised 0/1.
    pub fn record(&mut self, league_id: u32, market: &str, predicted: f64, hit: bool) {
        let t = self
            .trailing
            .entry((league_id, market.to_string()))
            .or_default();
        t.hits.push_back(hit);
        t.calibration_gap.push_back((predicted - if hit { 1.0 } else { 0.0 }).abs());
        while t.hits.len() > TRAILING_KEPT {
            t.hits.pop_front();
            t.calibration_gap.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_map_to_grades() {
        assert_eq!(Grade::from_score(0.80), Grade::A);
        assert_eq!(Grade::from_score(0.65), Grade::B);
        assert_eq!(Grade::from_score(0.50), Grade::C);
        assert_eq!(Grade::from_score(0.35), Grade::D);
        assert_eq!(Grade::from_score(0.10), Grade::F);
    }

    #[test]
    fn fresh_slice_uses_neutral_accuracy() {
        let grader = QualityGrader::new();
        let cfg = ModelConfig::default();
        // 0.35*1.0 + 0.40*0.9 + 0.25*0.5 = 0.835
        assert_eq!(grader.grade(39, "1x2", 1.0, 0.9, &cfg), Grade::A);
    }

    #[test]
    fn bad_trailing_accuracy_downgrades() {
        let mut grader = QualityGrader::new();
        let cfg = ModelConfig::default();
        for _ in 0..20 {
            grader.record(39, "1x2", 0.8, false);
        }
        // Point score is D-range already with accuracy 0; downgrade lands F.
        let g = grader.grade(39, "1x2", 1.0, 0.9, &cfg);
        assert!(g > Grade::B, "expected downgrade below B, got {g:?}");
    }

    #[test]
    fn trailing_ring_is_bounded() {
        let mut grader = QualityGrader::new();
        for _ in 0..250 {
            grader.record(39, "btts", 0.6, true);
        }
        let t = grader.trailing.get(&(39, "btts".to_string())).unwrap();
        assert_eq!(t.hits.len(), TRAILING_KEPT);
    }
}
