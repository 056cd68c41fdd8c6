use serde::{Deserialize, Serialize};

/// Every tunable constant in the model lives here with its documented
/// default. Nothing in the engine reads a magic number directly; backtest
/// configurations are built by toggling/overriding fields on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    // Rating system
    pub elo_k: f64,
    pub rating_home_adv_pts: f64,
    pub rating_default: f64,
    pub rating_floor: f64,
    pub rating_ceiling: f64,
    pub form_decay: f64,
    pub form_lookback: usize,
    pub form_weight: f64,
    pub h2h_k_multiplier: f64,
    pub h2h_min_matches: usize,
    pub inactivity_regression_per_month: f64,
    pub inactivity_regression_cap: f64,

    // Goal model
    pub dc_rho: f64,
    pub league_avg_goals: f64,
    pub home_adv_goal_share: f64,
    pub max_goals: u32,
    pub xg_floor: f64,
    pub xg_ceiling: f64,
    pub half_time_goal_share: f64,

    // Market derivation
    pub nb_dispersion_alpha: f64,
    pub prob_clip_lo: f64,
    pub prob_clip_hi: f64,
    pub league_avg_corners: f64,
    pub league_avg_cards: f64,
    pub league_avg_shots: f64,
    pub league_avg_shots_on_target: f64,
    pub league_avg_offsides: f64,
    pub league_avg_fouls: f64,
    pub home_adv_corners: f64,
    pub home_adv_shots: f64,
    pub home_adv_offsides: f64,
    pub offside_shrink_matches: f64,
    pub cards_total_floor: f64,
    pub cards_total_ceiling: f64,

    // Signal adjusters
    pub squad_gap_threshold: f64,
    pub squad_result_boost_cap: f64,
    pub signal_cache_ttl_secs: u64,

    // Calibration & grading
    pub calibration_min_samples: usize,
    pub calibration_bins: usize,
    pub grade_bad_accuracy: f64,
    pub grade_bad_calibration_error: f64,

    // Evaluation
    pub roi_min_confidence: f64,
    pub roi_min_edge: f64,

    // Parlay validation
    pub parlay_high_correlation: f64,
    pub parlay_moderate_correlation: f64,
    pub parlay_moderate_penalty: f64,

    // Feature toggles (the baseline/candidate axis for backtests)
    pub use_contextual_ratings: bool,
    pub use_dixon_coles_tau: bool,
    pub use_squad_quality: bool,
    pub use_referee_profile: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            elo_k: 32.0,
            rating_home_adv_pts: 65.0,
            rating_default: 1500.0,
            rating_floor: 1200.0,
            rating_ceiling: 2000.0,
            form_decay: 0.8,
            form_lookback: 5,
            form_weight: 0.20,
            h2h_k_multiplier: 1.5,
            h2h_min_matches: 2,
            inactivity_regression_per_month: 0.03,
            inactivity_regression_cap: 0.15,

            dc_rho: -0.13,
            league_avg_goals: 2.7,
            home_adv_goal_share: 0.15,
            max_goals: 10,
            xg_floor: 0.20,
            xg_ceiling: 4.00,
            half_time_goal_share: 0.45,

            nb_dispersion_alpha: 2.5,
            prob_clip_lo: 0.01,
            prob_clip_hi: 0.99,
            league_avg_corners: 10.5,
            league_avg_cards: 3.5,
            league_avg_shots: 25.0,
            league_avg_shots_on_target: 9.0,
            league_avg_offsides: 4.5,
            league_avg_fouls: 12.0,
            home_adv_corners: 1.10,
            home_adv_shots: 1.12,
            home_adv_offsides: 1.08,
            offside_shrink_matches: 20.0,
            cards_total_floor: 1.5,
            cards_total_ceiling: 7.0,

            squad_gap_threshold: 3.0,
            squad_result_boost_cap: 0.08,
            signal_cache_ttl_secs: 24 * 3600,

            calibration_min_samples: 30,
            calibration_bins: 10,
            grade_bad_accuracy: 0.50,
            grade_bad_calibration_error: 0.10,

            roi_min_confidence: 0.60,
            roi_min_edge: 0.05,

            parlay_high_correlation: 0.70,
            parlay_moderate_correlation: 0.30,
            parlay_moderate_penalty: 0.95,

            use_contextual_ratings: true,
            use_dixon_coles_tau: true,
            use_squad_quality: true,
            use_referee_profile: true,
        }
    }
}

impl ModelConfig {
    /// Baseline configuration for backtest comparisons: plain ratings and
    /// independent Poisson, no external signals.
    pub fn baseline() -> Self {
        Self {
            use_contextual_ratings: false,
            use_dixon_coles_tau: false,
            use_squad_quality: false,
            use_referee_profile: false,
            ..Self::default()
        }
    }
}
