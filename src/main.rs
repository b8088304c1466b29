use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use rediscover_sync::driver::Driver;
use rediscover_sync::models::StopReason;
use rediscover_sync::spotify::{SpotifyClient, SpotifyConfig};
use rediscover_sync::store::CatalogStore;

#[derive(Parser)]
#[command(name = "rediscover-sync")]
#[command(about = "Resumable migration of a track catalog into year-bucketed Spotify playlists")]
struct Args {
    /// Path to the catalog SQLite database
    catalog: PathBuf,

    /// Wall-clock budget for this invocation, in seconds
    #[arg(long, default_value_t = 110)]
    budget_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = CatalogStore::open(&args.catalog)
        .with_context(|| format!("failed to open catalog database {:?}", args.catalog))?;
    let config = SpotifyConfig::from_env().context("incomplete spotify configuration")?;
    let mut client = SpotifyClient::new(config);

    let budget = Duration::from_secs(args.budget_secs);
    let report = Driver::new(&store, &mut client, budget)
        .run()
        .context("migration pass failed")?;

    let stopped = match report.stop {
        StopReason::Deadline => "budget exhausted",
        StopReason::Fatal => "stopped on error",
    };
    println!("{:=<60}", "");
    println!("Migration pass complete ({stopped})");
    println!("  Visited:           {}", report.visited);
    println!("  Resolved:          {}", report.resolved);
    println!("  Marked unresolved: {}", report.marked_unresolved);
    println!("  Left pending:      {}", report.left_pending);
    println!("  Already terminal:  {}", report.already_terminal);
    println!("  Wrap-arounds:      {}", report.wraps);
    println!("  Cursor:            {}", report.final_position);
    println!("{:=<60}", "");

    Ok(())
}
