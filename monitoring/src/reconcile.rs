// Reconciliation
// One pass that checks the persisted structure this pipeline owns and
// repairs what is provably safe to repair. Everything else is escalated
// through an explicit alert channel; nothing is silently papered over.
// Runs at startup and on a schedule.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Decision, LifecycleEvent, ShadowOutcome, StorageConfig};
use event_log::EventBus;
use serde::de::DeserializeOwned;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub component: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Where reconciliation escalates what it cannot repair
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Default channel: alerts land in the service log
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn raise(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Warning => {
                warn!("[{}] {}", alert.component, alert.message)
            }
            AlertSeverity::Critical => {
                error!("[{}] {}", alert.component, alert.message)
            }
        }
    }
}

/// What one reconciliation pass found and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub events_checked: usize,
    pub sequence_gaps: usize,
    pub corrupt_event_lines: usize,
    pub corrupt_decision_lines: usize,
    pub corrupt_outcome_lines: usize,
    /// (previous, clamped-to) when the shadow checkpoint ran past the log
    pub checkpoint_clamped: Option<(u64, u64)>,
    pub orphaned_outcomes: usize,
    pub alerts_raised: usize,
}

pub struct Reconciler {
    storage: StorageConfig,
    bus: Arc<EventBus>,
    alerts: Arc<dyn AlertChannel>,
}

impl Reconciler {
    pub fn new(storage: StorageConfig, bus: Arc<EventBus>, alerts: Arc<dyn AlertChannel>) -> Self {
        Self {
            storage,
            bus,
            alerts,
        }
    }

    /// Run one reconciliation pass.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.check_event_log(&mut report).await?;
        self.check_side_logs(&mut report).await?;
        self.check_checkpoint(&mut report).await?;
        self.check_orphans(&mut report).await?;

        info!(
            "reconciliation pass done: {} events, {} gaps, {} alerts",
            report.events_checked, report.sequence_gaps, report.alerts_raised
        );
        Ok(report)
    }

    /// Run forever on a fixed cadence.
    pub async fn run_on_schedule(&self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("reconciliation pass failed: {:#}", e);
            }
        }
    }

    async fn check_event_log(&self, report: &mut ReconcileReport) -> Result<()> {
        let path = self.storage.event_log_path();
        let (events, corrupt) = scan_log::<LifecycleEvent>(&path).await?;
        report.events_checked = events.len();
        report.corrupt_event_lines = corrupt;

        if corrupt > 0 {
            self.raise(
                report,
                AlertSeverity::Critical,
                "event-log",
                format!(
                    "{} unreadable lines in {}; the audit trail has holes",
                    corrupt,
                    path.display()
                ),
            )
            .await;
        }

        let mut prev = 0u64;
        for event in &events {
            if event.seq != prev + 1 {
                report.sequence_gaps += 1;
            }
            prev = event.seq;
        }
        if report.sequence_gaps > 0 {
            // An append-only log cannot be backfilled; all we can do is say so.
            self.raise(
                report,
                AlertSeverity::Critical,
                "event-log",
                format!(
                    "{} sequence gaps in {}; transitions were lost",
                    report.sequence_gaps,
                    path.display()
                ),
            )
            .await;
        }
        Ok(())
    }

    async fn check_side_logs(&self, report: &mut ReconcileReport) -> Result<()> {
        let (_, corrupt) = scan_log::<Decision>(&self.storage.decisions_path()).await?;
        report.corrupt_decision_lines = corrupt;
        if corrupt > 0 {
            self.raise(
                report,
                AlertSeverity::Warning,
                "decision-log",
                format!("{} unreadable decision lines; affected blocks read as reason unknown", corrupt),
            )
            .await;
        }

        let (_, corrupt) = scan_log::<ShadowOutcome>(&self.storage.shadow_outcomes_path()).await?;
        report.corrupt_outcome_lines = corrupt;
        if corrupt > 0 {
            self.raise(
                report,
                AlertSeverity::Warning,
                "shadow-outcomes",
                format!("{} unreadable shadow outcome lines", corrupt),
            )
            .await;
        }
        Ok(())
    }

    async fn check_checkpoint(&self, report: &mut ReconcileReport) -> Result<()> {
        let path = self.storage.shadow_checkpoint_path();
        let checkpoint = shadow_execution::load_checkpoint(&path).await;
        let committed = self.bus.last_seq();

        if checkpoint > committed {
            // Safe repair: clamping only makes the engine reprocess events,
            // which its idempotence contract already allows.
            shadow_execution::store_checkpoint(&path, committed)
                .await
                .context("clamp shadow checkpoint")?;
            report.checkpoint_clamped = Some((checkpoint, committed));
            self.raise(
                report,
                AlertSeverity::Warning,
                "shadow-checkpoint",
                format!(
                    "checkpoint {} was past the committed log ({}); clamped",
                    checkpoint, committed
                ),
            )
            .await;
        }
        Ok(())
    }

    async fn check_orphans(&self, report: &mut ReconcileReport) -> Result<()> {
        let (outcomes, _) =
            scan_log::<ShadowOutcome>(&self.storage.shadow_outcomes_path()).await?;
        for outcome in outcomes {
            if self.bus.get(outcome.signal_id).is_none() {
                report.orphaned_outcomes += 1;
            }
        }
        if report.orphaned_outcomes > 0 {
            self.raise(
                report,
                AlertSeverity::Warning,
                "shadow-outcomes",
                format!(
                    "{} shadow outcomes reference signals missing from the index",
                    report.orphaned_outcomes
                ),
            )
            .await;
        }
        Ok(())
    }

    async fn raise(
        &self,
        report: &mut ReconcileReport,
        severity: AlertSeverity,
        component: &str,
        message: String,
    ) {
        report.alerts_raised += 1;
        self.alerts
            .raise(Alert {
                severity,
                component: component.to_string(),
                message,
                raised_at: Utc::now(),
            })
            .await;
    }
}

/// Parse a JSONL file, returning (valid records, corrupt line count).
async fn scan_log<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize)> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };

    let mut valid = Vec::new();
    let mut corrupt = 0usize;
    let mut lines = tokio::io::BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await.context("read line")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => valid.push(record),
            Err(_) => corrupt += 1,
        }
    }
    Ok((valid, corrupt))
}
