use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::ModelConfig;
use crate::fixtures::MatchImportance;

/// Aggregate squad ratings for one team, as scraped from a ratings source.
/// `Default` is the league-average profile, which is also the neutral
/// fallback for unknown teams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadQualityProfile {
    pub overall: f64,
    pub attack: f64,
    pub defense: f64,
    pub pace: f64,
    pub shooting: f64,
    pub physical: f64,
    pub skill_moves: f64,
    pub avg_age: f64,
    pub avg_height_cm: f64,
    pub elite_players: u32,
}

impl Default for SquadQualityProfile {
    fn default() -> Self {
        Self {
            overall: 75.0,
            attack: 75.0,
            defense: 75.0,
            pace: 80.0,
            shooting: 75.0,
            physical: 75.0,
            skill_moves: 2.5,
            avg_age: 26.5,
            avg_height_cm: 181.0,
            elite_players: 0,
        }
    }
}

/// Behavioural profile of one referee. `Default` is the league-wide average,
/// used whenever the referee is unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereeProfile {
    pub name: Option<String>,
    pub avg_cards_per_game: f64,
    /// 0 lenient, 1 card-happy.
    pub strictness: f64,
    /// away-cards / home-cards ratio; 1.0 means no bias.
    pub home_bias: f64,
    pub sample_games: u32,
}

impl Default for RefereeProfile {
    fn default() -> Self {
        Self {
            name: None,
            avg_cards_per_game: 3.5,
            strictness: 0.5,
            home_bias: 1.0,
            sample_games: 0,
        }
    }
}

/// Pluggable read-only lookups. Implementations must return the neutral
/// default for unknown keys instead of failing; a slow or broken source
/// degrades predictions, never blocks them.
pub trait SquadProvider {
    fn squad_profile(&self, team_name: &str) -> Option<SquadQualityProfile>;
}

pub trait RefereeProvider {
    fn referee_profile(&self, referee_name: &str) -> Option<RefereeProfile>;
}

/// Provider that knows nothing; every lookup degrades to neutral.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

impl SquadProvider for NoSignals {
    fn squad_profile(&self, _team_name: &str) -> Option<SquadQualityProfile> {
        None
    }
}

impl RefereeProvider for NoSignals {
    fn referee_profile(&self, _referee_name: &str) -> Option<RefereeProfile> {
        None
    }
}

/// Tagged adjustment produced by comparing the two squads. `neutral()` is the
/// documented absent-signal value; market code composes it without branching
/// on presence.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadAdjustment {
    /// Probability mass moved from the draw onto the stronger side's win.
    pub result_boost_home: f64,
    pub result_boost_away: f64,
    /// Additive expected-count shifts.
    pub corners_home: f64,
    pub corners_away: f64,
    pub cards_total: f64,
    pub shots_home: f64,
    pub shots_away: f64,
    pub shots_on_target_home: f64,
    pub shots_on_target_away: f64,
    /// Multiplicative offside factors.
    pub offsides_home_mult: f64,
    pub offsides_away_mult: f64,
}

impl SquadAdjustment {
    pub fn neutral() -> Self {
        Self {
            result_boost_home: 0.0,
            result_boost_away: 0.0,
            corners_home: 0.0,
            corners_away: 0.0,
            cards_total: 0.0,
            shots_home: 0.0,
            shots_away: 0.0,
            shots_on_target_home: 0.0,
            shots_on_target_away: 0.0,
            offsides_home_mult: 1.0,
            offsides_away_mult: 1.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    /// Differential-based adjustment between two squad profiles.
    pub fn from_profiles(
        home: &SquadQualityProfile,
        away: &SquadQualityProfile,
        cfg: &ModelConfig,
    ) -> Self {
        let mut adj = Self::neutral();

        // Result nudge above the quality-gap threshold, capped. The mass
        // comes out of the draw at application time.
        let quality_gap = home.overall - away.overall;
        if quality_gap.abs() > cfg.squad_gap_threshold {
            let boost = ((quality_gap.abs() - cfg.squad_gap_threshold) * 0.01)
                .min(cfg.squad_result_boost_cap);
            if quality_gap > 0.0 {
                adj.result_boost_home = boost;
            } else {
                adj.result_boost_away = boost;
            }
        }

        // Corners: pace presses high, skill earns deflections, the clearly
        // shorter side crosses more.
        adj.corners_home = (home.pace - 80.0) * 0.08 + (home.skill_moves - 2.5) * 0.4;
        adj.corners_away = (away.pace - 80.0) * 0.08 + (away.skill_moves - 2.5) * 0.4;
        let height_gap = home.avg_height_cm - away.avg_height_cm;
        if height_gap < -3.0 {
            adj.corners_home += height_gap.abs() * 0.1;
        } else if height_gap > 3.0 {
            adj.corners_away += height_gap * 0.1;
        }

        // Cards: physical mismatch, frustration fouls from a skill gap, and
        // combined age discipline.
        let physical_mismatch = (home.physical - away.physical).abs();
        if physical_mismatch > 5.0 {
            adj.cards_total += physical_mismatch * 0.06;
        }
        let skill_gap = (home.skill_moves - away.skill_moves).abs();
        if skill_gap > 1.5 {
            adj.cards_total += skill_gap * 0.8;
        }
        let combined_age = (home.avg_age + away.avg_age) / 2.0;
        if combined_age < 25.0 {
            adj.cards_total += 0.4;
        } else if combined_age > 30.0 {
            adj.cards_total -= 0.3;
        }

        // Shots: attack and pace add volume, shooting quality adds accuracy.
        adj.shots_home =
            (home.attack - 75.0) * 0.25 + (home.pace - 80.0) * 0.12 + (home.skill_moves - 2.5) * 0.5;
        adj.shots_away =
            (away.attack - 75.0) * 0.25 + (away.pace - 80.0) * 0.12 + (away.skill_moves - 2.5) * 0.5;
        adj.shots_on_target_home = (home.shooting - 75.0) * 0.15;
        adj.shots_on_target_away = (away.shooting - 75.0) * 0.15;

        // Offsides: raw pace runs into traps, youth mistimes them, dribblers
        // avoid them.
        adj.offsides_home_mult = offside_multiplier(home);
        adj.offsides_away_mult = offside_multiplier(away);

        debug!(
            quality_gap,
            cards_shift = adj.cards_total,
            "squad adjustment derived"
        );
        adj
    }
}

fn offside_multiplier(profile: &SquadQualityProfile) -> f64 {
    let mut mult = 1.0;
    if profile.pace > 85.0 {
        mult *= 1.0 + (profile.pace - 85.0) * 0.04;
    }
    mult *= if profile.avg_age < 23.0 {
        1.3
    } else if profile.avg_age < 25.0 {
        1.15
    } else if profile.avg_age > 30.0 {
        0.85
    } else {
        1.0
    };
    if profile.skill_moves > 3.5 {
        mult *= 0.8;
    }
    mult
}

/// Expected total cards from the referee's baseline, banded by strictness and
/// scaled by derby heat and match importance; team foul tendencies add on
/// top. Returned raw: the market layer clamps once, after the squad shift.
pub fn expected_cards(
    referee: &RefereeProfile,
    home_fouls_avg: f64,
    away_fouls_avg: f64,
    is_derby: bool,
    importance: MatchImportance,
    cfg: &ModelConfig,
) -> (f64, f64, f64) {
    let mut base = referee.avg_cards_per_game;
    if is_derby {
        base *= 1.3;
    }
    base *= importance.multiplier();
    base *= 0.7 + 0.6 * referee.strictness;

    let foul_shift = (home_fouls_avg - cfg.league_avg_fouls) * 0.15
        + (away_fouls_avg - cfg.league_avg_fouls) * 0.15;

    let total = base + foul_shift;

    // Away sides historically pick up the larger share, scaled by the
    // referee's own bias ratio.
    let away_share = (0.55 * referee.home_bias).clamp(0.0, 1.0);
    let away = total * away_share;
    let home = total - away;
    (total, home, away)
}

/// Caching wrapper around a pair of providers. Lookups go through a TTL
/// cache behind a mutex, so prediction can stay `&self` and run across
/// threads; cache fills are idempotent.
pub struct CachedSignals<S, R> {
    squads: S,
    referees: R,
    squad_cache: Mutex<TtlCache<String, Option<SquadQualityProfile>>>,
    referee_cache: Mutex<TtlCache<String, Option<RefereeProfile>>>,
}

impl<S: SquadProvider, R: RefereeProvider> CachedSignals<S, R> {
    pub fn new(squads: S, referees: R, ttl: Duration) -> Self {
        Self {
            squads,
            referees,
            squad_cache: Mutex::new(TtlCache::new(ttl)),
            referee_cache: Mutex::new(TtlCache::new(ttl)),
        }
    }
}

impl<S: SquadProvider, R: RefereeProvider> SquadProvider for CachedSignals<S, R> {
    fn squad_profile(&self, team_name: &str) -> Option<SquadQualityProfile> {
        let mut cache = match self.squad_cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get_or_insert_with(team_name.to_string(), || {
            self.squads.squad_profile(team_name)
        })
    }
}

impl<S: SquadProvider, R: RefereeProvider> RefereeProvider for CachedSignals<S, R> {
    fn referee_profile(&self, referee_name: &str) -> Option<RefereeProfile> {
        let mut cache = match self.referee_cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get_or_insert_with(referee_name.to_string(), || {
            self.referees.referee_profile(referee_name)
        })
    }
}
