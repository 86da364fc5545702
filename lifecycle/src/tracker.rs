// Decision tracker
// Records why signals were blocked, off the trading path. Tracking is
// best-effort observability: a full queue, a dead worker or a failing disk
// is logged and swallowed, never surfaced to the caller. Analytics treat a
// missing decision as "reason unknown".

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::Decision;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct DecisionTracker {
    tx: mpsc::Sender<Decision>,
    worker: JoinHandle<()>,
}

impl DecisionTracker {
    /// Start the tracker with a bounded queue in front of a writer task.
    pub fn spawn(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(write_loop(path.into(), rx));
        Self { tx, worker }
    }

    /// Hand a decision to the writer without blocking.
    ///
    /// Never returns an error and never blocks the trading path.
    pub fn track(&self, decision: Decision) {
        let signal_id = decision.signal_id;
        if let Err(e) = self.tx.try_send(decision) {
            warn!("decision for signal {} dropped: {}", signal_id, e);
        }
    }

    /// Drain the queue and stop the writer. Used on shutdown and in tests;
    /// the tracker works fine without ever being shut down.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::Receiver<Decision>) {
    // At most one decision per signal makes it to disk.
    let mut seen: HashSet<Uuid> = HashSet::new();

    while let Some(decision) = rx.recv().await {
        if !seen.insert(decision.signal_id) {
            debug!(
                "duplicate decision for signal {} ignored",
                decision.signal_id
            );
            continue;
        }
        if let Err(e) = append_decision(&path, &decision).await {
            warn!(
                "failed to persist decision for signal {}: {:#}",
                decision.signal_id, e
            );
        }
    }
}

async fn append_decision(path: &Path, decision: &Decision) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create decisions dir")?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .context("open decisions log")?;
    let mut line = serde_json::to_vec(decision).context("encode decision")?;
    line.push(b'\n');
    file.write_all(&line).await.context("append decision")?;
    file.sync_data().await.context("sync decisions log")?;
    Ok(())
}

/// Read-side access to the decisions log for analytics
pub struct DecisionLog;

impl DecisionLog {
    /// Read every decision on record, skipping unreadable lines.
    pub async fn read(path: impl AsRef<Path>) -> Result<Vec<Decision>> {
        use tokio::io::AsyncBufReadExt;

        let path = path.as_ref();
        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("open decisions log for read"),
        };

        let mut decisions = Vec::new();
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut line_no = 0u64;
        while let Some(line) = lines.next_line().await.context("read decisions line")? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Decision>(&line) {
                Ok(d) => decisions.push(d),
                Err(e) => warn!(
                    "skipping corrupted decision line {} in {}: {}",
                    line_no,
                    path.display(),
                    e
                ),
            }
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{MarketSnapshot, Verdict};
    use rust_decimal::Decimal;

    fn decision(signal_id: Uuid) -> Decision {
        Decision {
            signal_id,
            verdict: Verdict::Block,
            blocker_component: Some("VolatilityGuard".to_string()),
            blocker_reason: Some("vol 0.05 > max 0.04".to_string()),
            market_snapshot: MarketSnapshot {
                price: Decimal::new(100, 0),
                volatility: 0.05,
                spread: Decimal::new(1, 2),
                captured_at: Utc::now(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn tracked_decisions_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        let tracker = DecisionTracker::spawn(&path, 16);
        let id = Uuid::new_v4();
        tracker.track(decision(id));
        tracker.shutdown().await;

        let decisions = DecisionLog::read(&path).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].signal_id, id);
        assert_eq!(
            decisions[0].blocker_component.as_deref(),
            Some("VolatilityGuard")
        );
    }

    #[tokio::test]
    async fn at_most_one_decision_per_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        let tracker = DecisionTracker::spawn(&path, 16);
        let id = Uuid::new_v4();
        tracker.track(decision(id));
        tracker.track(decision(id));
        tracker.track(decision(Uuid::new_v4()));
        tracker.shutdown().await;

        let decisions = DecisionLog::read(&path).await.unwrap();
        assert_eq!(decisions.len(), 2);
    }

    #[tokio::test]
    async fn persistence_failure_never_reaches_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "decisions.jsonl" is a file, so creating the directory
        // under it fails on every append.
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"in the way").await.unwrap();
        let path = blocker.join("decisions.jsonl");

        let tracker = DecisionTracker::spawn(&path, 16);
        tracker.track(decision(Uuid::new_v4()));
        // No panic, no error: the failure is logged and swallowed.
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let decisions = DecisionLog::read(dir.path().join("none.jsonl")).await.unwrap();
        assert!(decisions.is_empty());
    }
}
