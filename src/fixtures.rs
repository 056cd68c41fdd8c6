use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

pub fn classify_outcome(home_goals: u32, away_goals: u32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatchImportance {
    Low,
    #[default]
    Normal,
    High,
}

impl MatchImportance {
    pub fn multiplier(self) -> f64 {
        match self {
            MatchImportance::Low => 0.9,
            MatchImportance::Normal => 1.0,
            MatchImportance::High => 1.2,
        }
    }
}

/// A scheduled match, known before kickoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: u64,
    pub league_id: u32,
    pub kickoff: DateTime<Utc>,
    pub home_id: u32,
    pub away_id: u32,
    pub home_name: String,
    pub away_name: String,
    pub referee: Option<String>,
    pub venue: Option<String>,
    pub is_derby: bool,
    pub importance: MatchImportance,
}

/// Post-match auxiliary counts. Every field is optional because data feeds
/// routinely omit them for lower leagues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuxStats {
    pub home_corners: Option<u32>,
    pub away_corners: Option<u32>,
    pub home_cards: Option<u32>,
    pub away_cards: Option<u32>,
    pub home_shots: Option<u32>,
    pub away_shots: Option<u32>,
    pub home_shots_on_target: Option<u32>,
    pub away_shots_on_target: Option<u32>,
    pub home_offsides: Option<u32>,
    pub away_offsides: Option<u32>,
    pub ht_home_goals: Option<u32>,
    pub ht_away_goals: Option<u32>,
}

impl AuxStats {
    pub fn total_corners(&self) -> Option<u32> {
        Some(self.home_corners? + self.away_corners?)
    }

    pub fn total_cards(&self) -> Option<u32> {
        Some(self.home_cards? + self.away_cards?)
    }

    pub fn total_shots(&self) -> Option<u32> {
        Some(self.home_shots? + self.away_shots?)
    }

    pub fn total_shots_on_target(&self) -> Option<u32> {
        Some(self.home_shots_on_target? + self.away_shots_on_target?)
    }

    pub fn total_offsides(&self) -> Option<u32> {
        Some(self.home_offsides? + self.away_offsides?)
    }

    pub fn ht_outcome(&self) -> Option<Outcome> {
        Some(classify_outcome(self.ht_home_goals?, self.ht_away_goals?))
    }
}

/// A fixture with its final score and whatever auxiliary counts the feed
/// provided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledFixture {
    pub fixture: Fixture,
    pub home_goals: u32,
    pub away_goals: u32,
    pub aux: AuxStats,
}

impl SettledFixture {
    pub fn outcome(&self) -> Outcome {
        classify_outcome(self.home_goals, self.away_goals)
    }

    pub fn goal_diff(&self) -> i32 {
        self.home_goals as i32 - self.away_goals as i32
    }
}

/// A batch of settled fixtures whose kickoff times are non-decreasing.
/// Rating replay and walk-forward backtests only accept this type, so
/// chronology is enforced once, at construction.
#[derive(Debug, Clone)]
pub struct ChronologicalFeed {
    fixtures: Vec<SettledFixture>,
}

impl ChronologicalFeed {
    /// Validates ordering and fails loudly on any kickoff regression.
    pub fn new(fixtures: Vec<SettledFixture>) -> Result<Self> {
        if let Some(pair) = fixtures
            .windows(2)
            .find(|w| w[1].fixture.kickoff < w[0].fixture.kickoff)
        {
            return Err(anyhow!(
                "fixtures out of chronological order: {} ({}) before {} ({})",
                pair[1].fixture.id,
                pair[1].fixture.kickoff,
                pair[0].fixture.id,
                pair[0].fixture.kickoff
            ));
        }
        Ok(Self { fixtures })
    }

    /// Sorts by kickoff (ties broken by fixture id) and wraps without the
    /// ordering check.
    pub fn sorted(mut fixtures: Vec<SettledFixture>) -> Self {
        fixtures.sort_by(|a, b| {
            a.fixture
                .kickoff
                .cmp(&b.fixture.kickoff)
                .then(a.fixture.id.cmp(&b.fixture.id))
        });
        Self { fixtures }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SettledFixture> {
        self.fixtures.iter()
    }

    pub fn as_slice(&self) -> &[SettledFixture] {
        &self.fixtures
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn fixture_at(id: u64, day: u32) -> SettledFixture {
    use chrono::TimeZone;
    SettledFixture {
        fixture: Fixture {
            id,
            league_id: 39,
            kickoff: Utc.with_ymd_and_hms(2025, 1, 1, 15, 0, 0).unwrap()
                + chrono::Duration::days(day as i64),
            home_id: 1,
            away_id: 2,
            home_name: "Home FC".into(),
            away_name: "Away FC".into(),
            referee: None,
            venue: None,
            is_derby: false,
            importance: MatchImportance::Normal,
        },
        home_goals: 1,
        away_goals: 1,
        aux: AuxStats::default(),
    }
}
