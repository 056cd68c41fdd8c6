use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use parlay_engine::backtest::BacktestRunner;
use parlay_engine::config::ModelConfig;
use parlay_engine::dataset;
use parlay_engine::evaluate::BacktestReport;

struct Args {
    db: Option<PathBuf>,
    league: u32,
    teams: u32,
    rounds: u32,
    seed: u64,
    json: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = Args {
        db: None,
        league: 39,
        teams: 16,
        rounds: 30,
        seed: 42,
        json: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--db" => args.db = it.next().map(PathBuf::from),
            "--json" => args.json = it.next().map(PathBuf::from),
            "--league" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.league = v;
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
                    "usage: backtest [--db PATH] [--league ID] [--teams N] [--rounds N] \
                     [--seed N] [--json PATH]"
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
    println!(
        "backtesting {} fixtures: baseline vs candidate\n",
        feed.len()
    );

    let cfg = ModelConfig::default();
    let runner = BacktestRunner::new(ModelConfig::baseline(), cfg.clone());
    let records = runner.run(&feed)?;
    let report = BacktestReport::build(&records, &cfg);

    for (config, table) in &report.metrics {
        println!("== {config} ==");
        println!(
            "{:<28} {:>7} {:>8} {:>8} {:>9}",
            "market", "samples", "accuracy", "brier", "log loss"
        );
        for (market, m) in table {
            println!(
                "{:<28} {:>7} {:>8.3} {:>8.4} {:>9.4}",
                market, m.samples, m.accuracy, m.brier, m.log_loss
            );
        }
        println!();
    }

    println!("== candidate minus baseline ==");
    for delta in &report.deltas {
        println!(
            "{:<28} accuracy {:+.3}  brier {:+.4}  log loss {:+.4}",
            delta.market, delta.accuracy_delta, delta.brier_delta, delta.log_loss_delta
        );
    }

    if report.flagged_pairs.is_empty() {
        println!("\nno dangerously correlated market pairs");
    } else {
        println!("\ndangerously correlated market pairs (|r| > {:.2}):", cfg.parlay_high_correlation);
        for (a, b, r) in report.flagged_pairs.iter().take(15) {
            println!("  {a} x {b}: r = {r:+.2}");
        }
    }

    if let Some(path) = &args.json {
        let raw = serde_json::to_string_pretty(&report).context("serialising report")?;
        fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
        println!("\nreport written to {}", path.display());
    }
    Ok(())
}
