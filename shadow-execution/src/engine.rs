// Shadow engine
// Consumes bus events in sequence order from its last checkpoint and keeps
// one virtual position per signal, whatever the live path decided. The
// checkpoint only moves after outcome writes are flushed, so a crash or
// restart anywhere mid-backlog replays into the same final ledger.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{CreatedPayload, EventType, LifecycleEvent, ScorePayload, ShadowOutcome};
use dashmap::DashMap;
use event_log::EventBus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outcomes::ShadowLedger;
use crate::position::{ExitRule, ShadowPosition};

/// Mark price provider for the simulation
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self, symbol: &str) -> Result<Decimal>;
}

/// Fixed price table, settable at runtime. Used by the test rig and the
/// demo; production wires a market-data collaborator here.
#[derive(Default)]
pub struct StaticPrices {
    prices: DashMap<String, Decimal>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn price(&self, symbol: &str) -> Result<Decimal> {
        match self.prices.get(symbol) {
            Some(p) => Ok(*p),
            None => bail!("no price for {}", symbol),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    last_processed_seq: u64,
}

pub struct ShadowEngine {
    bus: Arc<EventBus>,
    ledger: ShadowLedger,
    checkpoint_path: PathBuf,
    checkpoint: AtomicU64,
    prices: Arc<dyn PriceSource>,
    exit_rule: Box<dyn ExitRule>,
    positions: DashMap<Uuid, ShadowPosition>,
}

impl ShadowEngine {
    /// Open the engine against a bus, restoring the outcome ledger, the
    /// checkpoint and every still-open virtual position.
    pub async fn open(
        bus: Arc<EventBus>,
        outcomes_path: impl AsRef<Path>,
        checkpoint_path: impl AsRef<Path>,
        prices: Arc<dyn PriceSource>,
        exit_rule: Box<dyn ExitRule>,
    ) -> Result<Self> {
        let ledger = ShadowLedger::open(outcomes_path).await?;
        let checkpoint_path = checkpoint_path.as_ref().to_path_buf();
        let checkpoint = load_checkpoint(&checkpoint_path).await;

        let positions = DashMap::new();
        for outcome in ledger.all() {
            if outcome.closed {
                continue;
            }
            positions.insert(
                outcome.signal_id,
                ShadowPosition {
                    signal_id: outcome.signal_id,
                    symbol: outcome.symbol.clone(),
                    direction: outcome.direction,
                    entry: outcome.hypothetical_entry,
                    sizing_multiplier: outcome.sizing_multiplier,
                    opened_at: outcome.opened_at,
                },
            );
        }

        debug!(
            "shadow engine open: checkpoint {} with {} open positions",
            checkpoint,
            positions.len()
        );

        Ok(Self {
            bus,
            ledger,
            checkpoint_path,
            checkpoint: AtomicU64::new(checkpoint),
            prices,
            exit_rule,
            positions,
        })
    }

    pub fn ledger(&self) -> &ShadowLedger {
        &self.ledger
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::Acquire)
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }

    /// Process one catch-up batch: fold committed events past the
    /// checkpoint, persist the checkpoint, then mark open positions to
    /// market. Returns the number of events consumed.
    pub async fn poll_once(&self) -> Result<usize> {
        let start = self.checkpoint();
        let events = self.bus.events_after(start).await?;
        for event in &events {
            self.apply(event).await?;
        }
        if let Some(last) = events.last() {
            // Outcomes for this batch are already flushed; only now may
            // the checkpoint move past them.
            store_checkpoint(&self.checkpoint_path, last.seq).await?;
            self.checkpoint.store(last.seq, Ordering::Release);
        }
        self.mark_positions().await?;
        Ok(events.len())
    }

    /// Run forever on the engine's own cadence, fully decoupled from the
    /// live trading loop.
    pub async fn run(&self, poll_interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!("shadow engine consumed {} events", n),
                Err(e) => warn!("shadow poll failed, will retry: {:#}", e),
            }
        }
    }

    async fn apply(&self, event: &LifecycleEvent) -> Result<()> {
        match event.event_type {
            EventType::SignalCreated => {
                // Reprocessing after a crash between outcome write and
                // checkpoint write lands here; the existing outcome is the
                // proof this event was already handled.
                if self.ledger.get(event.signal_id).is_some() {
                    return Ok(());
                }
                let payload: CreatedPayload = match serde_json::from_value(event.payload.clone()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("seq {}: undecodable created payload: {}", event.seq, e);
                        return Ok(());
                    }
                };
                let signal = payload.signal;
                let mark = self
                    .prices
                    .price(&signal.symbol)
                    .await
                    .with_context(|| format!("entry mark for {}", signal.symbol))?;

                let position = ShadowPosition {
                    signal_id: signal.id,
                    symbol: signal.symbol.clone(),
                    direction: signal.direction,
                    entry: mark,
                    sizing_multiplier: 1.0,
                    opened_at: event.timestamp,
                };
                let outcome = ShadowOutcome {
                    signal_id: signal.id,
                    symbol: signal.symbol,
                    direction: signal.direction,
                    hypothetical_entry: mark,
                    hypothetical_exit: None,
                    pnl: Decimal::ZERO,
                    closed: false,
                    sizing_multiplier: 1.0,
                    opened_at: event.timestamp,
                    updated_at: event.timestamp,
                    exit_reason: None,
                    last_processed_seq: event.seq,
                };
                self.ledger.upsert(outcome).await?;
                self.positions.insert(position.signal_id, position);
            }
            EventType::SignalScored => {
                let payload: ScorePayload = match serde_json::from_value(event.payload.clone()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("seq {}: undecodable score payload: {}", event.seq, e);
                        return Ok(());
                    }
                };
                if let Some(mut position) = self.positions.get_mut(&event.signal_id) {
                    position.sizing_multiplier = payload.sizing_multiplier;
                }
                if let Some(mut outcome) = self.ledger.get(event.signal_id) {
                    if !outcome.closed && outcome.sizing_multiplier != payload.sizing_multiplier {
                        outcome.sizing_multiplier = payload.sizing_multiplier;
                        outcome.last_processed_seq = event.seq;
                        outcome.updated_at = event.timestamp;
                        self.ledger.upsert(outcome).await?;
                    }
                }
            }
            // The live verdict is irrelevant here: blocked signals are
            // simulated exactly like approved ones.
            EventType::StateChanged => {}
        }
        Ok(())
    }

    async fn mark_positions(&self) -> Result<()> {
        let open: Vec<ShadowPosition> = self.positions.iter().map(|p| p.value().clone()).collect();
        let now = Utc::now();

        for position in open {
            let mark = match self.prices.price(&position.symbol).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("no mark for {}, skipping this cycle: {}", position.symbol, e);
                    continue;
                }
            };
            let Some(mut outcome) = self.ledger.get(position.signal_id) else {
                continue;
            };

            let elapsed = now - position.opened_at;
            let pnl = position.unrealized_pnl(mark);

            if let Some(reason) = self.exit_rule.should_exit(&position, mark, elapsed) {
                outcome.hypothetical_exit = Some(mark);
                outcome.pnl = pnl;
                outcome.closed = true;
                outcome.exit_reason = Some(reason.clone());
                outcome.updated_at = now;
                self.ledger.upsert(outcome).await?;
                self.positions.remove(&position.signal_id);
                info!(
                    "shadow position {} closed ({}) pnl {}",
                    position.signal_id, reason, pnl
                );
            } else if outcome.pnl != pnl {
                outcome.pnl = pnl;
                outcome.updated_at = now;
                self.ledger.upsert(outcome).await?;
            }
        }
        Ok(())
    }
}

/// Read a checkpoint file, falling back to the log head when missing or
/// unreadable (replay is idempotent, so starting over is always safe).
pub async fn load_checkpoint(path: &Path) -> u64 {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(c) => c.last_processed_seq,
            Err(e) => {
                warn!(
                    "checkpoint {} unreadable ({}), restarting from the log head",
                    path.display(),
                    e
                );
                0
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => {
            warn!(
                "checkpoint {} unreadable ({}), restarting from the log head",
                path.display(),
                e
            );
            0
        }
    }
}

/// Write the checkpoint atomically: temp file, fsync, rename. A crash can
/// leave the old checkpoint or the new one, never a torn file.
pub async fn store_checkpoint(path: &Path, seq: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create checkpoint dir")?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec(&Checkpoint {
        last_processed_seq: seq,
    })
    .context("encode checkpoint")?;

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .context("create checkpoint tmp")?;
    file.write_all(&payload).await.context("write checkpoint tmp")?;
    file.sync_all().await.context("sync checkpoint tmp")?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .context("rename checkpoint into place")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::TimeAndTargetExit;
    use common::{Signal, SignalDirection, SignalState};
    use event_log::EventDraft;
    use std::collections::BTreeMap;

    fn signal(symbol: &str) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: SignalDirection::Long,
            strategy_name: "momentum-v1".to_string(),
            component_scores: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    fn exit_rule() -> Box<dyn ExitRule> {
        Box::new(TimeAndTargetExit {
            max_hold: chrono::Duration::hours(24),
            take_profit_pct: 0.05,
            stop_loss_pct: 0.03,
        })
    }

    struct Rig {
        bus: Arc<EventBus>,
        prices: Arc<StaticPrices>,
        outcomes_path: PathBuf,
        checkpoint_path: PathBuf,
    }

    async fn rig(dir: &tempfile::TempDir) -> Rig {
        let bus = Arc::new(EventBus::open(dir.path().join("events.jsonl")).await.unwrap());
        let prices = Arc::new(StaticPrices::new());
        prices.set("BTC-USD", Decimal::new(100, 0));
        Rig {
            bus,
            prices,
            outcomes_path: dir.path().join("shadow.jsonl"),
            checkpoint_path: dir.path().join("checkpoint.json"),
        }
    }

    impl Rig {
        async fn engine(&self) -> ShadowEngine {
            ShadowEngine::open(
                self.bus.clone(),
                &self.outcomes_path,
                &self.checkpoint_path,
                self.prices.clone(),
                exit_rule(),
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn blocked_signals_are_simulated_like_approved_ones() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig(&dir).await;

        let blocked = signal("BTC-USD");
        let blocked_id = blocked.id;
        r.bus.publish(EventDraft::created(blocked, "generator")).await.unwrap();
        r.bus
            .publish(EventDraft::transition(
                blocked_id,
                SignalState::Generated,
                SignalState::Evaluating,
                "live",
            ))
            .await
            .unwrap();
        r.bus
            .publish(EventDraft::transition(
                blocked_id,
                SignalState::Evaluating,
                SignalState::Blocked,
                "live",
            ))
            .await
            .unwrap();

        let approved = signal("BTC-USD");
        let approved_id = approved.id;
        r.bus.publish(EventDraft::created(approved, "generator")).await.unwrap();

        let engine = r.engine().await;
        engine.poll_once().await.unwrap();

        assert!(engine.ledger().get(blocked_id).is_some());
        assert!(engine.ledger().get(approved_id).is_some());
        assert_eq!(engine.checkpoint(), r.bus.last_seq());
        assert_eq!(engine.open_positions(), 2);
    }

    #[tokio::test]
    async fn price_move_past_target_closes_the_position() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig(&dir).await;

        let s = signal("BTC-USD");
        let id = s.id;
        r.bus.publish(EventDraft::created(s, "generator")).await.unwrap();

        let engine = r.engine().await;
        engine.poll_once().await.unwrap();
        let open = engine.ledger().get(id).unwrap();
        assert!(!open.closed);
        assert_eq!(open.hypothetical_entry, Decimal::new(100, 0));

        // +6% clears the 5% take-profit.
        r.prices.set("BTC-USD", Decimal::new(106, 0));
        engine.poll_once().await.unwrap();

        let closed = engine.ledger().get(id).unwrap();
        assert!(closed.closed);
        assert_eq!(closed.pnl, Decimal::new(6, 0));
        assert_eq!(closed.exit_reason.as_deref(), Some("take_profit"));
        assert_eq!(engine.open_positions(), 0);
    }

    #[tokio::test]
    async fn restart_mid_backlog_reaches_the_same_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig(&dir).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let s = signal("BTC-USD");
            ids.push(s.id);
            r.bus.publish(EventDraft::created(s, "generator")).await.unwrap();
        }

        // First engine consumes half the backlog, then "crashes".
        let engine = r.engine().await;
        engine.poll_once().await.unwrap();
        let first_pass: Vec<_> = engine.ledger().all();
        drop(engine);

        for _ in 0..3 {
            let s = signal("BTC-USD");
            ids.push(s.id);
            r.bus.publish(EventDraft::created(s, "generator")).await.unwrap();
        }

        // Restarted engine resumes from the checkpoint.
        let engine = r.engine().await;
        let consumed = engine.poll_once().await.unwrap();
        assert_eq!(consumed, 3);

        assert_eq!(engine.ledger().len(), 6);
        for id in &ids {
            assert!(engine.ledger().get(*id).is_some());
        }
        // Outcomes from the first pass were not recreated or double counted.
        for old in first_pass {
            let current = engine.ledger().get(old.signal_id).unwrap();
            assert_eq!(current.opened_at, old.opened_at);
            assert_eq!(current.hypothetical_entry, old.hypothetical_entry);
        }
    }

    #[tokio::test]
    async fn reprocessing_checkpointed_events_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig(&dir).await;

        let s = signal("BTC-USD");
        let id = s.id;
        r.bus.publish(EventDraft::created(s, "generator")).await.unwrap();

        let engine = r.engine().await;
        engine.poll_once().await.unwrap();
        let before = engine.ledger().get(id).unwrap();
        drop(engine);

        // Delete the checkpoint: the restarted engine re-reads the whole
        // log, but existing outcomes prove the events were handled.
        tokio::fs::remove_file(&r.checkpoint_path).await.unwrap();
        let engine = r.engine().await;
        engine.poll_once().await.unwrap();

        assert_eq!(engine.ledger().len(), 1);
        let after = engine.ledger().get(id).unwrap();
        assert_eq!(after.opened_at, before.opened_at);
        assert_eq!(after.hypothetical_entry, before.hypothetical_entry);
    }

    #[tokio::test]
    async fn scored_events_update_virtual_sizing() {
        let dir = tempfile::tempdir().unwrap();
        let r = rig(&dir).await;

        let s = signal("BTC-USD");
        let id = s.id;
        r.bus.publish(EventDraft::created(s, "generator")).await.unwrap();
        r.bus
            .publish(EventDraft::scored(
                id,
                SignalState::Generated,
                0.55,
                2.0,
                common::WeightSnapshot {
                    version: 1,
                    weights: BTreeMap::new(),
                    loaded_at: Utc::now(),
                },
            ))
            .await
            .unwrap();

        let engine = r.engine().await;
        engine.poll_once().await.unwrap();

        // +6 per unit, doubled by the sizing multiplier.
        r.prices.set("BTC-USD", Decimal::new(106, 0));
        engine.poll_once().await.unwrap();

        let outcome = engine.ledger().get(id).unwrap();
        assert_eq!(outcome.sizing_multiplier, 2.0);
        assert_eq!(outcome.pnl, Decimal::new(12, 0));
    }
}
