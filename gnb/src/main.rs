//! Albor Space 5G GNodeB MAC Uplink Application
//!
//! Runs the MAC uplink core on a set of UE workers and replays a JSON-lines
//! trace of PHY indications and UE lifecycle requests through it.

mod config;
mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::executor::{RoundRobinUeExecutorMapper, TaskExecutor, WorkerExecutor};
use layers::mac::{MacUlDependencies, MacUlProcessor};

use crate::config::MacAppConfig;
use crate::replay::{LoggingScheduler, LoggingUeControl, ReplayCounters, TraceReplayer};

/// Albor Space 5G GNodeB MAC uplink
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// JSON-lines trace of uplink events to replay
    #[arg(short, long)]
    trace: String,

    /// Number of UE workers, overrides the config file
    #[arg(long)]
    nof_workers: Option<usize>,
}

/// Wait until every task queued so far on `executor` has run
async fn drain(executor: &dyn TaskExecutor) {
    let (tx, rx) = oneshot::channel();
    if executor.execute(Box::new(move || {
        let _ = tx.send(());
    })) {
        let _ = rx.await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut app_config = match &args.config {
        Some(path) => MacAppConfig::from_yaml_file(path)?,
        None => MacAppConfig::default(),
    };
    if let Some(nof_workers) = args.nof_workers {
        app_config.workers.nof_ue_workers = nof_workers;
    }

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| app_config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space MAC uplink");
    info!("Configuration file: {}", args.config.as_deref().unwrap_or("<defaults>"));
    app_config.validate()?;

    info!("Cell configuration:");
    info!("  Cell index: {}", app_config.cell.cell_index);
    info!("  PRBs: {}, DL ports: {}", app_config.cell.nof_rbs, app_config.cell.nof_ports);
    info!(
        "  UE workers: {} (queue size {})",
        app_config.workers.nof_ue_workers, app_config.workers.queue_size
    );

    // Create execution contexts
    let mut worker_handles = Vec::new();
    let mut ue_workers: Vec<Arc<dyn TaskExecutor>> = Vec::new();
    for i in 0..app_config.workers.nof_ue_workers {
        let (worker, handle) = WorkerExecutor::spawn(format!("ue-worker-{}", i), app_config.workers.queue_size);
        ue_workers.push(Arc::new(worker));
        worker_handles.push(handle);
    }
    let (bg_worker, bg_handle) = WorkerExecutor::spawn("dl-buffer-bg", 64);
    worker_handles.push(bg_handle);

    // Create MAC uplink processor
    let counters = Arc::new(ReplayCounters::default());
    let deps = MacUlDependencies {
        ue_exec_mapper: Arc::new(RoundRobinUeExecutorMapper::new(ue_workers.clone())),
        bg_executor: Arc::new(bg_worker),
        sched: Arc::new(LoggingScheduler::new(counters.clone())),
        ue_ctrl_notifier: Arc::new(LoggingUeControl::new(counters.clone())),
    };
    let mac_config = app_config.to_mac_config();
    let cell_index = mac_config.cells[0].cell_index;
    let mac_ul = Arc::new(MacUlProcessor::new(mac_config, deps)?);
    info!("MAC uplink initialized");

    let running = Arc::new(RwLock::new(true));

    // Start statistics reporting
    let stats_handle = {
        let mac_ul = mac_ul.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));

            while *running.read().await {
                interval.tick().await;

                let stats = mac_ul.stats();
                info!("MAC UL Statistics:");
                info!(
                    "  PDUs received: {}, discarded: {}",
                    stats.pdus_received, stats.pdus_discarded
                );
                info!(
                    "  SDUs forwarded: {}, discarded: {}",
                    stats.sdus_forwarded, stats.sdus_discarded
                );
            }
        })
    };

    // Replay the trace on a blocking thread, submissions never wait
    let replay_handle = {
        let file = File::open(&args.trace).with_context(|| format!("Failed to open trace {}", args.trace))?;
        let replayer = TraceReplayer::new(mac_ul.clone(), counters.clone());
        tokio::task::spawn_blocking(move || replayer.replay(BufReader::new(file)))
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = replay_handle => {
            match result {
                Ok(Ok(summary)) => info!(
                    "Trace replayed: {} events, {} invalid lines, {} rejected requests",
                    summary.events, summary.invalid_lines, summary.rejected_requests
                ),
                Ok(Err(e)) => error!("Trace replay failed: {:#}", e),
                Err(e) => error!("Trace replay task failed: {}", e),
            }
        }
    }

    // Shutdown
    info!("Shutting down MAC uplink");
    *running.write().await = false;

    // Contention resolution may queue work on another worker, drain twice
    for _ in 0..2 {
        for worker in &ue_workers {
            drain(worker.as_ref()).await;
        }
    }

    let stats = mac_ul.stats();
    info!("Final MAC UL statistics:");
    info!(
        "  PDUs received: {}, discarded: {}",
        stats.pdus_received, stats.pdus_discarded
    );
    info!(
        "  SDUs forwarded: {}, discarded: {}",
        stats.sdus_forwarded, stats.sdus_discarded
    );
    info!(
        "  BSRs: {}, PHRs: {}, SRs: {}, C-RNTI CEs: {}, CCCH: {}",
        stats.bsrs_reported, stats.phrs_reported, stats.srs_triggered, stats.crnti_ces_received, stats.ccch_msgs_received
    );
    counters.log_summary();

    match mac_ul.dl_buffer_pool(cell_index) {
        Ok(pool) => info!(
            "DL buffer pool: {} of {} descriptors carved, {} cached, {} lent",
            pool.nof_carved(),
            pool.capacity(),
            pool.nof_cached(),
            pool.nof_lent()
        ),
        Err(e) => warn!("{}", e),
    }

    // Workers stop once the last executor handle is gone
    stats_handle.abort();
    let _ = stats_handle.await;
    drop(ue_workers);
    drop(mac_ul);
    for handle in worker_handles {
        if tokio::time::timeout(tokio::time::Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            warn!("Worker did not stop in time");
        }
    }

    info!("MAC uplink shutdown complete");
    Ok(())
}
