use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use common::config;
use event_log::EventBus;
use lifecycle::SignalStateMachine;
use monitoring::{
    classify, LogAlertChannel, MonitorThresholds, PipelineMetrics, PipelineMonitor, Reconciler,
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config_path =
        std::env::var("PIPELINE_CONFIG").unwrap_or_else(|_| "pipeline.toml".to_string());
    let config = match config::load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!("config {} not loaded ({}), using defaults", config_path, e);
            common::PipelineConfig::default()
        }
    };

    info!("Starting pipeline monitor daemon");

    let bus = Arc::new(EventBus::open(config.storage.event_log_path()).await?);
    info!(
        "event log replayed: {} signals, last seq {}",
        bus.signal_count(),
        bus.last_seq()
    );

    let machine = Arc::new(SignalStateMachine::new(bus.clone()));
    let monitor = PipelineMonitor::new(
        bus.clone(),
        MonitorThresholds {
            stuck_threshold: ChronoDuration::seconds(config.expiry.stuck_threshold_secs as i64),
            critical_stuck_count: config.monitor.critical_stuck_count,
        },
    );
    let metrics = PipelineMetrics::new()?;
    let reconciler = Reconciler::new(config.storage.clone(), bus.clone(), Arc::new(LogAlertChannel));

    // Startup reconciliation before anything else touches the files.
    reconciler.run_once().await?;

    let expire_after = ChronoDuration::seconds(config.expiry.expire_after_secs as i64);
    let sweep_interval = Duration::from_secs(config.expiry.sweep_interval_secs);
    let snapshot_interval = Duration::from_secs(config.monitor.snapshot_interval_secs);

    let monitor_loop = async {
        let mut ticker = tokio::time::interval(snapshot_interval);
        loop {
            ticker.tick().await;
            let snapshot = monitor.snapshot();
            let health = classify(&snapshot, monitor.thresholds());
            metrics.record(&snapshot, health);
            info!(
                "health {}: {} signals, {} stuck, {}/h throughput",
                health,
                snapshot.counts_by_state.values().sum::<usize>(),
                snapshot.stuck_signals.len(),
                snapshot.throughput_per_hour
            );
            for stuck in snapshot.stuck_signals.iter().take(5) {
                warn!(
                    "stuck signal {} in {} for {}m",
                    stuck.signal_id,
                    stuck.state,
                    stuck.stuck_for.num_minutes()
                );
            }
        }
    };

    let expire_loop = async {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match machine.auto_expire(expire_after).await {
                Ok(expired) if !expired.is_empty() => {
                    info!("expired {} stale signals", expired.len())
                }
                Ok(_) => {}
                Err(e) => warn!("expiry sweep failed: {:#}", e),
            }
        }
    };

    let reconcile_loop = reconciler.run_on_schedule(Duration::from_secs(3_600));

    tokio::select! {
        _ = monitor_loop => {}
        _ = expire_loop => {}
        _ = reconcile_loop => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully...");
        }
    }

    Ok(())
}
