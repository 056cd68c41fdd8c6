use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use parlay_engine::dataset;
use parlay_engine::fixtures::SettledFixture;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut input: Option<PathBuf> = None;
    let mut db = PathBuf::from("fixtures.db");
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--input" => input = it.next().map(PathBuf::from),
            "--db" => {
                if let Some(v) = it.next() {
                    db = PathBuf::from(v);
                }
            }
            "--help" | "-h" => {
                println!("usage: ingest --input FIXTURES.json [--db PATH]");
                std::process::exit(0);
            }
            other => eprintln!("ignoring unknown flag {other}"),
        }
    }
    let Some(input) = input else {
        bail!("--input is required (a JSON array of settled fixtures)");
    };

    let raw = fs::read_to_string(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    let fixtures: Vec<SettledFixture> =
        serde_json::from_str(&raw).context("parsing fixture JSON")?;

    let conn = dataset::open(&db)?;
    let count = dataset::ingest(&conn, &fixtures)?;
    println!("ingested {count} fixtures into {}", db.display());
    Ok(())
}
