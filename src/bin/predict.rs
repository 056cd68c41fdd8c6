use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use parlay_engine::calibrate::Calibrator;
use parlay_engine::config::ModelConfig;
use parlay_engine::dataset;
use parlay_engine::fixtures::{Fixture, MatchImportance};
use parlay_engine::league_params::{compute_league_params, LeagueParams};
use parlay_engine::markets::AggregateStore;
use parlay_engine::predictor::Predictor;
use parlay_engine::quality::QualityGrader;
use parlay_engine::ratings::RatingStore;
use parlay_engine::signals::NoSignals;

struct Args {
    db: Option<PathBuf>,
    league: u32,
    home: u32,
    away: u32,
    teams: u32,
    rounds: u32,
    seed: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        db: None,
        league: 39,
        home: 1,
        away: 2,
        teams: 16,
        rounds: 30,
        seed: 42,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--db" => args.db = it.next().map(PathBuf::from),
            "--league" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.league = v;
                }
            }
            "--home" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.home = v;
                }
            }
            "--away" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.away = v;
                }
            }
            "--teams" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.teams = v;
                }
            }
            "--rounds" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.rounds = v;
                }
            }
            "--seed" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.seed = v;
                }
            }
            "--help" | "-h" => {
                println!(
                    "usage: predict [--db PATH] [--league ID] [--home ID] [--away ID] \
                     [--teams N] [--rounds N] [--seed N]"
                );
                std::process::exit(0);
            }
            other => eprintln!("ignoring unknown flag {other}"),
        }
    }
    args
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();

    let feed = match &args.db {
        Some(path) => {
            let conn = dataset::open(path)?;
            dataset::load_settled(&conn, Some(args.league))
                .context("loading settled fixtures")?
        }
        None => dataset::synthetic_feed(args.teams, args.rounds, args.league, args.seed),
    };
    println!("replaying {} settled fixtures", feed.len());

    let cfg = ModelConfig::default();
    let mut store = RatingStore::new(cfg.clone());
    let mut aggregates = AggregateStore::new();
    store.replay(&feed);
    for settled in feed.iter() {
        aggregates.absorb(settled);
    }

    let mut leagues = HashMap::new();
    leagues.insert(
        args.league,
        compute_league_params(args.league, feed.as_slice()),
    );
    let league: &LeagueParams = &leagues[&args.league];
    println!(
        "league {}: avg goals {:.2}, home share {:.2}, rho {:.2}",
        args.league, league.goals_total_base, league.home_adv_goals, league.dc_rho
    );

    let calibrator = Calibrator::new();
    let grader = QualityGrader::new();
    let predictor = Predictor {
        store: &store,
        aggregates: &aggregates,
        leagues: &leagues,
        calibrator: &calibrator,
        grader: &grader,
        squads: &NoSignals,
        referees: &NoSignals,
        cfg: &cfg,
    };

    let fixture = Fixture {
        id: u64::MAX,
        league_id: args.league,
        kickoff: Utc::now(),
        home_id: args.home,
        away_id: args.away,
        home_name: format!("Team {}", args.home),
        away_name: format!("Team {}", args.away),
        referee: None,
        venue: None,
        is_derby: false,
        importance: MatchImportance::Normal,
    };
    let set = predictor.predict(&fixture)?;

    println!(
        "\nTeam {} vs Team {}  (xG {:.2} - {:.2}, rho {:.2})",
        args.home, args.away, set.goal_rates.home_xg, set.goal_rates.away_xg, set.goal_rates.rho
    );
    let grid = parlay_engine::goal_model::ScoreGrid::from_estimate(&set.goal_rates, &cfg);
    let (mh, ma, mp) = grid.most_likely_score();
    println!("most likely score: {mh}-{ma} ({:.1}%)\n", mp * 100.0);
    println!("{:<28} {:<44} {:>5}", "market", "probabilities", "grade");
    for market in &set.markets {
        let probs: Vec<String> = market
            .probs
            .iter()
            .map(|(label, p)| format!("{label} {:.1}%", p * 100.0))
            .collect();
        println!(
            "{:<28} {:<44} {:>5?}",
            market.market,
            probs.join("  "),
            market.grade
        );
    }
    Ok(())
}
