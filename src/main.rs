use std::sync::Arc;

use tracing::info;

use timetable::clock::SystemClock;
use timetable::config::Config;
use timetable::engine::Scheduler;
use timetable::ledger::MemoryLedger;
use timetable::store::{self, BookingStore, MemoryStore};
use timetable::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries responses, so logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env()?;
    timetable::observability::init(config.metrics_port)?;

    let store: Arc<dyn BookingStore> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let journaled = Arc::new(MemoryStore::open(dir.join("bookings.journal"))?);
            tokio::spawn(store::run_compactor(journaled.clone(), config.compact_threshold));
            journaled
        }
        None => Arc::new(MemoryStore::new()),
    };

    let scheduler = Arc::new(
        Scheduler::new(store, Arc::new(SystemClock::new(config.timezone)))
            .with_ledger(Arc::new(MemoryLedger::new()))
            .with_batch_size(config.batch_size),
    );

    info!("timetable ready, reading commands from stdin");
    info!("  data_dir: {}", config.data_dir.as_ref().map_or("none (volatile)".to_string(), |d| d.display().to_string()));
    info!("  timezone: {}", config.timezone);
    info!("  batch_size: {}", config.batch_size);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    tokio::select! {
        result = wire::process_stream(tokio::io::stdin(), tokio::io::stdout(), scheduler) => {
            result?;
            info!("stdin closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("timetable stopped");
    Ok(())
}
