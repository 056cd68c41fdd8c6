use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::config::ModelConfig;
use crate::fixtures::{ChronologicalFeed, SettledFixture};
use crate::league_params::league_default_rating;

/// Which rating a caller wants. `VsOpponent` includes the head-to-head blend
/// when enough shared history exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingContext {
    Overall,
    Home,
    Away,
    VsOpponent { opponent_id: u32, is_home: bool },
}

#[derive(Debug, Clone)]
pub struct TeamRating {
    pub overall: f64,
    pub home: f64,
    pub away: f64,
    /// Match results as scores (1.0 win, 0.5 draw, 0.0 loss), oldest first.
    recent: VecDeque<f64>,
    /// Head-to-head rating per opponent, alongside how many meetings back it.
    h2h: HashMap<u32, (f64, usize)>,
    last_match: Option<DateTime<Utc>>,
}

impl TeamRating {
    fn seeded(rating: f64) -> Self {
        Self {
            overall: rating,
            home: rating,
            away: rating,
            recent: VecDeque::new(),
            h2h: HashMap::new(),
            last_match: None,
        }
    }
}

const RECENT_KEPT: usize = 10;

/// One contextual strength rating per team. Mutation happens only through
/// `replay`, which consumes a `ChronologicalFeed`, so every update path is an
/// ordered single-writer pass.
#[derive(Debug, Clone, Default)]
pub struct RatingStore {
    teams: HashMap<u32, TeamRating>,
    cfg: ModelConfig,
}

impl RatingStore {
    pub fn new(cfg: ModelConfig) -> Self {
        Self {
            teams: HashMap::new(),
            cfg,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    /// Contextual rating for a team. Unknown teams resolve to the league's
    /// default seed, never an error.
    pub fn get(&self, team_id: u32, league_id: u32, ctx: RatingContext) -> f64 {
        let default = league_default_rating(league_id);
        let Some(team) = self.teams.get(&team_id) else {
            return default;
        };
        if !self.cfg.use_contextual_ratings {
            return team.overall;
        }
        match ctx {
            RatingContext::Overall => team.overall,
            RatingContext::Home => team.home,
            RatingContext::Away => team.away,
            RatingContext::VsOpponent { opponent_id, is_home } => {
                self.blend(team, opponent_id, is_home)
            }
        }
    }

    /// 50% venue + 30% overall + 20% form-adjusted overall at the default
    /// form weight; when the pair has enough shared history a 20% h2h-delta
    /// share comes out of the overall term. The overall share is always the
    /// remainder, so the blend sums to 1 for any configured form weight.
    /// Missing h2h is omitted from the blend, not zero-filled.
    fn blend(&self, team: &TeamRating, opponent_id: u32, is_home: bool) -> f64 {
        const VENUE_WEIGHT: f64 = 0.50;
        const H2H_WEIGHT: f64 = 0.20;

        let venue = if is_home { team.home } else { team.away };
        let form_adj = self.form_adjustment(team);

        let h2h = team
            .h2h
            .get(&opponent_id)
            .filter(|(_, n)| *n >= self.cfg.h2h_min_matches)
            .map(|(r, _)| r - team.overall);

        match h2h {
            Some(delta) => {
                let overall_weight = 1.0 - VENUE_WEIGHT - H2H_WEIGHT - self.cfg.form_weight;
                venue * VENUE_WEIGHT
                    + team.overall * overall_weight
                    + (team.overall + form_adj) * self.cfg.form_weight
                    + (team.overall + delta) * H2H_WEIGHT
            }
            None => {
                let overall_weight = 1.0 - VENUE_WEIGHT - self.cfg.form_weight;
                venue * VENUE_WEIGHT
                    + team.overall * overall_weight
                    + (team.overall + form_adj) * self.cfg.form_weight
            }
        }
    }

    /// Decay-weighted mean of the last few results mapped onto rating points:
    /// all wins is +50, all losses -50.
    fn form_adjustment(&self, team: &TeamRating) -> f64 {
        let lookback = self.cfg.form_lookback;
        if team.recent.is_empty() {
            return 0.0;
        }
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (i, score) in team.recent.iter().rev().take(lookback).enumerate() {
            let w = self.cfg.form_decay.powi(i as i32);
            weighted += score * w;
            weight_sum += w;
        }
        let avg = weighted / weight_sum;
        (avg - 0.5) * 100.0
    }

    /// Logistic expectation for the home side with the home-advantage offset
    /// in rating points.
    pub fn expected_home_score(&self, home_rating: f64, away_rating: f64) -> f64 {
        let diff = away_rating - (home_rating + self.cfg.rating_home_adv_pts);
        1.0 / (1.0 + 10f64.powf(diff / 400.0))
    }

    /// Replays an ordered feed through the store. The feed type is the only
    /// accepted input, so out-of-order application is unrepresentable here.
    pub fn replay(&mut self, feed: &ChronologicalFeed) {
        for settled in feed.iter() {
            self.apply(settled);
        }
    }

    /// Walk-forward replay: the visitor sees the store as it stood before
    /// each fixture settles, which is exactly the state a live prediction
    /// would have had.
    pub fn try_replay_with<E>(
        &mut self,
        feed: &ChronologicalFeed,
        mut visit: impl FnMut(&Self, &SettledFixture) -> Result<(), E>,
    ) -> Result<(), E> {
        for settled in feed.iter() {
            visit(self, settled)?;
            self.apply(settled);
        }
        Ok(())
    }

    fn apply(&mut self, settled: &SettledFixture) {
        let fx = &settled.fixture;
        let default = league_default_rating(fx.league_id);

        self.regress_if_inactive(fx.home_id, default, fx.kickoff);
        self.regress_if_inactive(fx.away_id, default, fx.kickoff);

        let home = self
            .teams
            .entry(fx.home_id)
            .or_insert_with(|| TeamRating::seeded(default))
            .overall;
        let away = self
            .teams
            .entry(fx.away_id)
            .or_insert_with(|| TeamRating::seeded(default))
            .overall;

        let expected_home = self.expected_home_score(home, away);
        let (home_score, away_score) = match settled.goal_diff() {
            d if d > 0 => (1.0, 0.0),
            d if d < 0 => (0.0, 1.0),
            _ => (0.5, 0.5),
        };

        let gd = settled.goal_diff().unsigned_abs() as f64;
        let mov = if gd > 0.0 { (gd + 1.0).ln() + 1.0 } else { 1.0 };
        let k = self.cfg.elo_k * fx.importance.multiplier() * mov;

        let home_delta = k * (home_score - expected_home);
        let away_delta = k * (away_score - (1.0 - expected_home));

        self.update_side(fx.home_id, fx.away_id, home_delta, home_score, true, fx.kickoff);
        self.update_side(fx.away_id, fx.home_id, away_delta, away_score, false, fx.kickoff);
    }

    fn update_side(
        &mut self,
        team_id: u32,
        opponent_id: u32,
        delta: f64,
        score: f64,
        is_home: bool,
        kickoff: DateTime<Utc>,
    ) {
        let floor = self.cfg.rating_floor;
        let ceiling = self.cfg.rating_ceiling;
        let h2h_k = self.cfg.h2h_k_multiplier;
        // apply() seeds both sides before calling here.
        let Some(team) = self.teams.get_mut(&team_id) else {
            return;
        };

        team.overall = (team.overall + delta).clamp(floor, ceiling);
        if is_home {
            team.home = (team.home + delta).clamp(floor, ceiling);
        } else {
            team.away = (team.away + delta).clamp(floor, ceiling);
        }

        let overall = team.overall;
        let entry = team.h2h.entry(opponent_id).or_insert((overall, 0));
        entry.0 = (entry.0 + delta * h2h_k).clamp(floor, ceiling);
        entry.1 += 1;

        team.recent.push_back(score);
        while team.recent.len() > RECENT_KEPT {
            team.recent.pop_front();
        }
        team.last_match = Some(kickoff);
    }

    /// Ratings drift toward the league mean while a team is inactive, 3% per
    /// month capped at 15%.
    fn regress_if_inactive(&mut self, team_id: u32, league_mean: f64, now: DateTime<Utc>) {
        let per_month = self.cfg.inactivity_regression_per_month;
        let cap = self.cfg.inactivity_regression_cap;
        let Some(team) = self.teams.get_mut(&team_id) else {
            return;
        };
        let Some(last) = team.last_match else {
            return;
        };
        let days = (now - last).num_days();
        if days <= 30 {
            return;
        }
        let months = days as f64 / 30.0;
        let regression = (per_month * months).min(cap);
        team.overall += (league_mean - team.overall) * regression;
        team.home += (league_mean - team.home) * regression;
        team.away += (league_mean - team.away) * regression;
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    /// Snapshot of a team's ratings for display.
    pub fn snapshot(&self, team_id: u32) -> Option<(f64, f64, f64)> {
        self.teams.get(&team_id).map(|t| (t.overall, t.home, t.away))
    }
}
