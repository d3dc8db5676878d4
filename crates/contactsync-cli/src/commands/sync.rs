//! Sync subcommand for the remote contact directory.
//!
//! `run` performs one sync attempt: it keeps re-running passes until the
//! local store and the remote directory converge, then records the new
//! last-sync time.

use clap::Subcommand;
use contactsync_core::sync::{CorrelationStore, HttpDirectory, SyncEngine, SyncReport};
use contactsync_core::{Config, KeyringCredentials, SqliteContactStore};
use tracing::debug;

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one sync attempt until both sides converge
    Run {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show last sync time and correlation counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget all sync state; the next run is a full-history sync
    Reset,
}

/// Run the sync command.
pub async fn run(action: SyncAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SyncAction::Run { json } => {
            let report = run_attempt().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        SyncAction::Status { json } => {
            let status = CorrelationStore::open()?.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                match status.last_sync_at {
                    Some(at) => println!("Last sync:   {}", at.to_rfc3339()),
                    None => println!("Last sync:   never"),
                }
                println!("Correlated:  {}", status.correlated_count);
                println!("Known local: {}", status.known_count);
            }
        }
        SyncAction::Reset => {
            CorrelationStore::open()?.reset()?;
            println!("sync state cleared; next sync covers full history");
        }
    }
    Ok(())
}

async fn run_attempt() -> Result<SyncReport, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let remote = HttpDirectory::from_config(&config)?;
    let local = SqliteContactStore::open(&config)?;
    let correlations = CorrelationStore::open()?;
    let credentials = KeyringCredentials::new(config.oauth.clone());
    debug!(base_url = %config.remote.base_url, "starting sync attempt");

    let mut engine = SyncEngine::new(&remote, &local, &correlations, &credentials);
    Ok(engine.run().await?)
}

fn print_report(report: &SyncReport) {
    let summary = report.summary();
    println!(
        "Sync converged after {} pass(es): {} created, {} updated, {} deleted",
        report.passes, summary.created, summary.updated, summary.deleted
    );
    for failure in &report.failures {
        println!("  skipped {}: {}", failure.contact_key, failure.reason);
    }
}
