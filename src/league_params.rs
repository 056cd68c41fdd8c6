use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fixtures::SettledFixture;
use crate::goal_model::ScoreGrid;

/// Tiered starting ratings by league id. Unlisted leagues fall back to 1500.
pub static LEAGUE_DEFAULT_RATING: Lazy<HashMap<u32, f64>> = Lazy::new(|| {
    HashMap::from([
        (39, 1600.0),  // Premier League
        (140, 1580.0), // La Liga
        (78, 1560.0),  // Bundesliga
        (135, 1540.0), // Serie A
        (61, 1520.0),  // Ligue 1
        (94, 1450.0),  // Primeira Liga
        (88, 1440.0),  // Eredivisie
        (203, 1420.0), // Super Lig
        (2, 1650.0),   // Champions League
        (3, 1550.0),   // Europa League
    ])
});

pub fn league_default_rating(league_id: u32) -> f64 {
    LEAGUE_DEFAULT_RATING.get(&league_id).copied().unwrap_or(1500.0)
}

/// Per-league scoring environment, fitted from history and shrunk toward
/// global defaults when the sample is thin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueParams {
    pub league_id: u32,
    pub sample_matches: usize,
    pub goals_total_base: f64,
    pub home_adv_goals: f64,
    pub dc_rho: f64,
    pub avg_corners: f64,
    pub avg_cards: f64,
}

impl LeagueParams {
    pub fn defaults(league_id: u32) -> Self {
        Self {
            league_id,
            sample_matches: 0,
            goals_total_base: 2.70,
            home_adv_goals: 0.15,
            dc_rho: -0.13,
            avg_corners: 10.5,
            avg_cards: 3.5,
        }
    }
}

// Shrinkage weight: a fitted value only fully replaces the default once the
// league sample reaches this many matches.
const MIN_N: f64 = 200.0;

/// Fits league scoring parameters from settled fixtures, shrinking each
/// estimate toward the global default in proportion to sample size.
pub fn compute_league_params(league_id: u32, matches: &[SettledFixture]) -> LeagueParams {
    let defaults = LeagueParams::defaults(league_id);
    if matches.is_empty() {
        return defaults;
    }

    let n = matches.len() as f64;
    let mut goals = 0.0;
    let mut diff = 0.0;
    let mut draws = 0usize;
    let mut corners = 0.0;
    let mut corner_n = 0.0;
    let mut cards = 0.0;
    let mut card_n = 0.0;

    for m in matches {
        goals += (m.home_goals + m.away_goals) as f64;
        diff += m.goal_diff() as f64;
        if m.home_goals == m.away_goals {
            draws += 1;
        }
        if let Some(c) = m.aux.total_corners() {
            corners += c as f64;
            corner_n += 1.0;
        }
        if let Some(c) = m.aux.total_cards() {
            cards += c as f64;
            card_n += 1.0;
        }
    }

    let w = n / (n + MIN_N);
    let blend = |fitted: f64, default: f64| w * fitted + (1.0 - w) * default;

    let goals_total = blend(goals / n, defaults.goals_total_base);
    // Home advantage as a share of total goals, from the mean goal diff.
    let home_share = if goals > 0.0 { (diff / n) / (goals / n) } else { 0.0 };
    let home_adv = blend(home_share.clamp(0.0, 0.40), defaults.home_adv_goals);

    let draw_rate = draws as f64 / n;
    let fitted_rho = fit_dc_rho_to_draw_rate(goals_total, home_adv, draw_rate);
    let rho = blend(fitted_rho, defaults.dc_rho);

    let avg_corners = if corner_n > 0.0 {
        let wc = corner_n / (corner_n + MIN_N);
        wc * (corners / corner_n) + (1.0 - wc) * defaults.avg_corners
    } else {
        defaults.avg_corners
    };
    let avg_cards = if card_n > 0.0 {
        let wc = card_n / (card_n + MIN_N);
        wc * (cards / card_n) + (1.0 - wc) * defaults.avg_cards
    } else {
        defaults.avg_cards
    };

    LeagueParams {
        league_id,
        sample_matches: matches.len(),
        goals_total_base: goals_total,
        home_adv_goals: home_adv,
        dc_rho: rho,
        avg_corners,
        avg_cards,
    }
}

/// Grid search for the rho whose implied draw probability best matches the
/// observed draw rate at the league's average goal rates.
pub fn fit_dc_rho_to_draw_rate(goals_total: f64, home_adv: f64, draw_rate: f64) -> f64 {
    let lambda_home = goals_total * (0.5 + home_adv / 2.0);
    let lambda_away = goals_total - lambda_home;

    let mut best_rho = -0.13;
    let mut best_err = f64::INFINITY;
    for step in -25..=5 {
        let rho = step as f64 / 100.0;
        let grid = ScoreGrid::build(lambda_home, lambda_away, rho, 10, true);
        let (_, p_draw, _) = grid.result_probs();
        let err = (p_draw - draw_rate).abs();
        if err < best_err {
            best_err = err;
            best_rho = rho;
        }
    }
    best_rho
}

pub fn default_params_path() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLAY_ENGINE_CACHE_DIR") {
        return PathBuf::from(dir).join("league_params.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".cache/parlay_engine/league_params.json")
}

pub fn load_cached_params(path: &PathBuf) -> Result<HashMap<u32, LeagueParams>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading league params from {}", path.display()))?;
    let params: HashMap<u32, LeagueParams> =
        serde_json::from_str(&raw).context("parsing league params JSON")?;
    Ok(params)
}

/// Writes to a temp file in the same directory and renames, so readers never
/// observe a half-written file.
pub fn save_cached_params(path: &PathBuf, params: &HashMap<u32, LeagueParams>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating cache dir {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string_pretty(params).context("serialising league params")?;
    fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} into place", tmp.display()))?;
    info!(path = %path.display(), leagues = params.len(), "saved league params");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixture_at;

    #[test]
    fn unknown_league_gets_global_default_rating() {
        assert_eq!(league_default_rating(9999), 1500.0);
        assert_eq!(league_default_rating(39), 1600.0);
    }

    #[test]
    fn empty_sample_returns_defaults() {
        let p = compute_league_params(61, &[]);
        assert_eq!(p.sample_matches, 0);
        assert!((p.goals_total_base - 2.70).abs() < 1e-12);
    }

    #[test]
    fn small_sample_stays_near_defaults() {
        // Ten freak 5-0 results should barely move the shrunk estimate.
        let matches: Vec<_> = (0..10)
            .map(|i| {
                let mut m = fixture_at(i, i as u32);
                m.home_goals = 5;
                m.away_goals = 0;
                m
            })
            .collect();
        let p = compute_league_params(39, &matches);
        assert!(p.goals_total_base < 3.0);
        assert!(p.home_adv_goals < 0.20);
    }
}
