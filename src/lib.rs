//! Football match-outcome prediction and evaluation engine: contextual Elo
//! ratings, a Dixon-Coles score grid, per-market probability derivation,
//! squad/referee signal adjusters, calibration and quality grading, a
//! walk-forward backtester, and correlation-aware parlay validation.

pub mod backtest;
pub mod cache;
pub mod calibrate;
pub mod config;
pub mod dataset;
pub mod dist;
pub mod evaluate;
pub mod fixtures;
pub mod goal_model;
pub mod league_params;
pub mod markets;
pub mod parlay;
pub mod predictor;
pub mod quality;
pub mod ratings;
pub mod signals;

pub use backtest::{BacktestRecord, BacktestRunner, NoOdds, OddsProvider};
pub use config::ModelConfig;
pub use evaluate::{BacktestReport, CorrelationMatrix};
pub use fixtures::{ChronologicalFeed, Fixture, Outcome, SettledFixture};
pub use goal_model::{GoalRateEstimate, ScoreGrid};
pub use markets::MarketPrediction;
pub use parlay::{ParlaySelection, ParlayValidation, ParlayValidator, ParlayVerdict};
pub use predictor::{PredictionSet, Predictor};
pub use quality::Grade;
pub use ratings::{RatingContext, RatingStore};
