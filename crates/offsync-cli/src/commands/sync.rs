//! Drain the operation log and reconcile with Google.

use std::error::Error;
use std::sync::Arc;

use offsync_core::integrations::{GoogleClient, KeyringTokenSource, LocalState, Reconciler};
use offsync_core::sync::DrainReport;
use offsync_core::{Config, EntityClass, LogNotifier, SyncEngine};

use super::open_store;

fn open_engine(config: &Config) -> Result<(SyncEngine, Arc<offsync_core::Database>), Box<dyn Error>> {
    let store = open_store()?;
    let engine = SyncEngine::from_config(config, store.clone(), Arc::new(LogNotifier))?;
    Ok((engine, store))
}

fn print_drain(report: &DrainReport) {
    println!(
        "drain: {:?} (succeeded {}, dropped {}, requeued {})",
        report.outcome, report.succeeded, report.dropped, report.requeued
    );
}

/// Run one drain, optionally followed by a full reload.
pub fn run(reload: bool) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let (engine, _store) = open_engine(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let report = engine.process().await;
        print_drain(&report);

        if reload {
            let snapshot = engine.reload().await?;
            for class in EntityClass::ALL {
                println!("{}: {} row(s)", class.table(), snapshot.rows(class).len());
            }
            if !snapshot.pruned.is_empty() {
                println!("pruned {} tombstone(s)", snapshot.pruned.len());
            }
        }

        let status = engine.status();
        println!("pending: {}", status.pending_count);
        Ok::<(), Box<dyn Error>>(())
    })
}

/// Reload, reconcile with Google, then drain whatever the pull enqueued.
pub fn reconcile() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    if !config.google.enabled {
        println!("google sync is disabled (offsync config set google.enabled true)");
        return Ok(());
    }
    let (engine, store) = open_engine(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let snapshot = engine.reload().await?;
        let mut state = LocalState::from_snapshot(&snapshot);

        let api = GoogleClient::new(&config.google, Arc::new(KeyringTokenSource::google()));
        let mut reconciler = Reconciler::new(Arc::new(api), store, config.google.clone())?;
        match reconciler.reconcile(&mut state, &engine).await {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) if e.is_credential_missing() => {
                println!("google is not connected; skipped");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        print_drain(&engine.process().await);
        Ok::<(), Box<dyn Error>>(())
    })
}
