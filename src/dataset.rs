use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{Connection, params};
use tracing::info;

use crate::fixtures::{
    AuxStats, ChronologicalFeed, Fixture, MatchImportance, SettledFixture,
};

pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("opening fixture store at {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("opening in-memory fixture store")?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS fixtures (
            id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            kickoff TEXT NOT NULL,
            home_id INTEGER NOT NULL,
            away_id INTEGER NOT NULL,
            home_name TEXT NOT NULL,
            away_name TEXT NOT NULL,
            referee TEXT,
            venue TEXT,
            is_derby INTEGER NOT NULL DEFAULT 0,
            importance TEXT NOT NULL DEFAULT 'normal',
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            home_corners INTEGER,
            away_corners INTEGER,
            home_cards INTEGER,
            away_cards INTEGER,
            home_shots INTEGER,
            away_shots INTEGER,
            home_sot INTEGER,
            away_sot INTEGER,
            home_offsides INTEGER,
            away_offsides INTEGER,
            ht_home_goals INTEGER,
            ht_away_goals INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_fixtures_league_kickoff
            ON fixtures (league_id, kickoff);",
    )
    .context("creating fixtures schema")?;
    Ok(())
}

fn importance_str(importance: MatchImportance) -> &'static str {
    match importance {
        MatchImportance::Low => "low",
        MatchImportance::Normal => "normal",
        MatchImportance::High => "high",
    }
}

fn parse_importance(raw: &str) -> MatchImportance {
    match raw {
        "low" => MatchImportance::Low,
        "high" => MatchImportance::High,
        _ => MatchImportance::Normal,
    }
}

pub fn upsert(conn: &Connection, settled: &SettledFixture) -> Result<()> {
    let fx = &settled.fixture;
    let aux = &settled.aux;
    conn.execute(
        "INSERT OR REPLACE INTO fixtures (
            id, league_id, kickoff, home_id, away_id, home_name, away_name,
            referee, venue, is_derby, importance, home_goals, away_goals,
            home_corners, away_corners, home_cards, away_cards,
            home_shots, away_shots, home_sot, away_sot,
            home_offsides, away_offsides, ht_home_goals, ht_away_goals
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            fx.id,
            fx.league_id,
            fx.kickoff.to_rfc3339(),
            fx.home_id,
            fx.away_id,
            fx.home_name,
            fx.away_name,
            fx.referee,
            fx.venue,
            fx.is_derby as i64,
            importance_str(fx.importance),
            settled.home_goals,
            settled.away_goals,
            aux.home_corners,
            aux.away_corners,
            aux.home_cards,
            aux.away_cards,
            aux.home_shots,
            aux.away_shots,
            aux.home_shots_on_target,
            aux.away_shots_on_target,
            aux.home_offsides,
            aux.away_offsides,
            aux.ht_home_goals,
            aux.ht_away_goals,
        ],
    )
    .with_context(|| format!("upserting fixture {}", fx.id))?;
    Ok(())
}

pub fn ingest(conn: &Connection, fixtures: &[SettledFixture]) -> Result<usize> {
    for settled in fixtures {
        upsert(conn, settled)?;
    }
    info!(count = fixtures.len(), "ingested fixtures");
    Ok(fixtures.len())
}

/// Loads settled fixtures strictly ordered by kickoff then id, so the result
/// wraps directly into the feed the rating replay requires.
pub fn load_settled(conn: &Connection, league_id: Option<u32>) -> Result<ChronologicalFeed> {
    let base = "SELECT id, league_id, kickoff, home_id, away_id, home_name, away_name,
            referee, venue, is_derby, importance, home_goals, away_goals,
            home_corners, away_corners, home_cards, away_cards,
            home_shots, away_shots, home_sot, away_sot,
            home_offsides, away_offsides, ht_home_goals, ht_away_goals
        FROM fixtures";

    let sql = match league_id {
        Some(_) => format!("{base} WHERE league_id = ?1 ORDER BY kickoff, id"),
        None => format!("{base} ORDER BY kickoff, id"),
    };
    let mut stmt = conn.prepare(&sql).context("preparing fixture query")?;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SettledFixture> {
        let kickoff_raw: String = row.get(2)?;
        let kickoff = DateTime::parse_from_rfc3339(&kickoff_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default());
        let importance_raw: String = row.get(10)?;
        Ok(SettledFixture {
            fixture: Fixture {
                id: row.get(0)?,
                league_id: row.get(1)?,
                kickoff,
                home_id: row.get(3)?,
                away_id: row.get(4)?,
                home_name: row.get(5)?,
                away_name: row.get(6)?,
                referee: row.get(7)?,
                venue: row.get(8)?,
                is_derby: row.get::<_, i64>(9)? != 0,
                importance: parse_importance(&importance_raw),
            },
            home_goals: row.get(11)?,
            away_goals: row.get(12)?,
            aux: AuxStats {
                home_corners: row.get(13)?,
                away_corners: row.get(14)?,
                home_cards: row.get(15)?,
                away_cards: row.get(16)?,
                home_shots: row.get(17)?,
                away_shots: row.get(18)?,
                home_shots_on_target: row.get(19)?,
                away_shots_on_target: row.get(20)?,
                home_offsides: row.get(21)?,
                away_offsides: row.get(22)?,
                ht_home_goals: row.get(23)?,
                ht_away_goals: row.get(24)?,
            },
        })
    };

    let rows = match league_id {
        Some(league) => stmt.query_map(params![league], map_row),
        None => stmt.query_map([], map_row),
    }
    .context("querying fixtures")?;

    let mut fixtures = Vec::new();
    for row in rows {
        fixtures.push(row.context("reading fixture row")?);
    }
    ChronologicalFeed::new(fixtures)
}

/// Deterministic synthetic history. Latent team strengths drive Poisson
/// score sampling, and every auxiliary count is filled in so all markets
/// have ground truth.
pub fn synthetic_feed(n_teams: u32, rounds: u32, league_id: u32, seed: u64) -> ChronologicalFeed {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_teams = n_teams.max(4);

    // Latent strengths around 1.0.
    let strengths: Vec<f64> = (0..n_teams).map(|_| rng.gen_range(0.6..1.6)).collect();

    let start = Utc.with_ymd_and_hms(2024, 8, 10, 15, 0, 0)
        .single()
        .unwrap_or_default();

    let mut fixtures = Vec::new();
    let mut id = 1u64;
    for round in 0..rounds {
        // Rotate pairings so everyone meets everyone over enough rounds.
        for i in 0..n_teams / 2 {
            let home = (i + round) % n_teams;
            let away = (n_teams - 1 - i + round) % n_teams;
            if home == away {
                continue;
            }
            let kickoff = start + chrono::Duration::days((round * 7) as i64);

            let home_rate = 1.45 * strengths[home as usize] / strengths[away as usize];
            let away_rate = 1.15 * strengths[away as usize] / strengths[home as usize];
            let home_goals = sample_poisson(&mut rng, home_rate.clamp(0.2, 4.0));
            let away_goals = sample_poisson(&mut rng, away_rate.clamp(0.2, 4.0));
            let ht_home = rng.gen_range(0..=home_goals.min(2));
            let ht_away = rng.gen_range(0..=away_goals.min(2));

            fixtures.push(SettledFixture {
                fixture: Fixture {
                    id,
                    league_id,
                    kickoff,
                    home_id: home + 1,
                    away_id: away + 1,
                    home_name: format!("Team {}", home + 1),
                    away_name: format!("Team {}", away + 1),
                    referee: Some(format!("Referee {}", rng.gen_range(1..=6))),
                    venue: None,
                    is_derby: rng.gen_bool(0.05),
                    importance: MatchImportance::Normal,
                },
                home_goals,
                away_goals,
                aux: AuxStats {
                    home_corners: Some(sample_poisson(&mut rng, 5.6)),
                    away_corners: Some(sample_poisson(&mut rng, 4.7)),
                    home_cards: Some(sample_poisson(&mut rng, 1.7)),
                    away_cards: Some(sample_poisson(&mut rng, 2.0)),
                    home_shots: Some(sample_poisson(&mut rng, 13.0)),
                    away_shots: Some(sample_poisson(&mut rng, 11.0)),
                    home_shots_on_target: Some(sample_poisson(&mut rng, 4.8)),
                    away_shots_on_target: Some(sample_poisson(&mut rng, 4.1)),
                    home_offsides: Some(sample_poisson(&mut rng, 2.4)),
                    away_offsides: Some(sample_poisson(&mut rng, 2.1)),
                    ht_home_goals: Some(ht_home),
                    ht_away_goals: Some(ht_away),
                },
            });
            id += 1;
        }
    }

    ChronologicalFeed::sorted(fixtures)
}

/// Knuth's product method; fine for the small rates used here.
fn sample_poisson(rng: &mut StdRng, lambda: f64) -> u32 {
    let limit = (-lambda).exp();
    let mut k = 0u32;
    let mut product: f64 = rng.r#gen();
    while product > limit {
        k += 1;
        product *= rng.r#gen::<f64>();
        if k > 50 {
            break;
        }
    }
    k
}
