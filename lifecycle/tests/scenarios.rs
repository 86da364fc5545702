// Full-pipeline scenarios: live path, counterfactuals and recovery
// exercised together against real files in a temp directory.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::{ComponentScore, MarketSnapshot, Signal, SignalDirection, SignalRecord, SignalState};
use conviction::{ConvictionScorer, WeightStore};
use event_log::EventBus;
use lifecycle::{
    DecisionLog, DecisionTracker, ExecutionBackend, FillResult, LivePipeline, PipelineOutcome,
    SignalStateMachine, VolatilityGuard,
};
use rust_decimal::Decimal;
use shadow_execution::{OpportunityReport, ShadowEngine, StaticPrices, TimeAndTargetExit};
use uuid::Uuid;

struct PaperFill;

#[async_trait]
impl ExecutionBackend for PaperFill {
    async fn execute(&self, _signal: &SignalRecord) -> Result<FillResult> {
        Ok(FillResult {
            fill_price: Decimal::new(100, 0),
            filled_at: Utc::now(),
        })
    }
}

fn make_signal(symbol: &str) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        direction: SignalDirection::Long,
        strategy_name: "momentum-v1".to_string(),
        component_scores: BTreeMap::from([
            (
                "momentum".to_string(),
                ComponentScore {
                    confidence: 0.8,
                    alignment: 1.0,
                },
            ),
            (
                "orderflow".to_string(),
                ComponentScore {
                    confidence: 0.6,
                    alignment: 0.5,
                },
            ),
        ]),
        created_at: Utc::now(),
    }
}

fn market(volatility: f64) -> MarketSnapshot {
    MarketSnapshot {
        price: Decimal::new(100, 0),
        volatility,
        spread: Decimal::new(1, 2),
        captured_at: Utc::now(),
    }
}

struct Rig {
    bus: Arc<EventBus>,
    machine: Arc<SignalStateMachine>,
    pipeline: LivePipeline,
    tracker: Arc<DecisionTracker>,
    prices: Arc<StaticPrices>,
    dir: tempfile::TempDir,
}

async fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();

    tokio::fs::write(
        data.join("weights.toml"),
        "[weights]\nmomentum = 0.5\norderflow = 0.5\n",
    )
    .await
    .unwrap();

    let bus = Arc::new(EventBus::open(data.join("events.jsonl")).await.unwrap());
    let machine = Arc::new(SignalStateMachine::new(bus.clone()));
    let weights = Arc::new(WeightStore::open(data.join("weights.toml")).await.unwrap());
    let tracker = Arc::new(DecisionTracker::spawn(data.join("decisions.jsonl"), 128));

    let pipeline = LivePipeline::new(
        machine.clone(),
        ConvictionScorer::default(),
        weights,
        Box::new(PaperFill),
        Duration::from_millis(500),
    )
    .add_gate(Box::new(VolatilityGuard {
        max_volatility: 0.04,
    }))
    .with_tracker(tracker.clone());

    let prices = Arc::new(StaticPrices::new());
    prices.set("BTC-USD", Decimal::new(100, 0));

    Rig {
        bus,
        machine,
        pipeline,
        tracker,
        prices,
        dir,
    }
}

impl Rig {
    async fn shadow(&self) -> ShadowEngine {
        ShadowEngine::open(
            self.bus.clone(),
            self.dir.path().join("shadow_outcomes.jsonl"),
            self.dir.path().join("shadow_checkpoint.json"),
            self.prices.clone(),
            Box::new(TimeAndTargetExit::default()),
        )
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn high_conviction_signal_executes_at_double_size() {
    let r = rig().await;

    let signal = make_signal("BTC-USD");
    let id = signal.id;
    // 0.5*0.8*1.0 + 0.5*0.6*0.5 = 0.55, top ladder tier
    let outcome = r.pipeline.process(signal, &market(0.01)).await.unwrap();

    match outcome {
        PipelineOutcome::Executed {
            sizing_multiplier, ..
        } => assert_eq!(sizing_multiplier, 2.0),
        other => panic!("expected executed, got {:?}", other),
    }
    let record = r.machine.record(id).unwrap();
    assert_eq!(record.current_state, SignalState::Executed);
    assert_eq!(record.sizing_multiplier, Some(2.0));
}

#[tokio::test]
async fn blocked_signal_shows_up_as_opportunity_cost() {
    let r = rig().await;

    let signal = make_signal("BTC-USD");
    let id = signal.id;
    let outcome = r.pipeline.process(signal, &market(0.05)).await.unwrap();
    match &outcome {
        PipelineOutcome::Blocked {
            component, reason, ..
        } => {
            assert_eq!(component, "VolatilityGuard");
            assert_eq!(reason, "vol 0.05 > max 0.04");
        }
        other => panic!("expected blocked, got {:?}", other),
    }

    // Shadow opens the virtual position at 100, closes it at +5%.
    let shadow = r.shadow().await;
    shadow.poll_once().await.unwrap();
    r.prices.set("BTC-USD", Decimal::new(105, 0));
    shadow.poll_once().await.unwrap();

    let shadow_outcome = shadow.ledger().get(id).unwrap();
    assert!(shadow_outcome.closed);

    // Drain the decision queue before reading the log back.
    let Rig {
        bus,
        pipeline,
        tracker,
        dir,
        ..
    } = r;
    drop(pipeline);
    Arc::try_unwrap(tracker).ok().unwrap().shutdown().await;

    let decisions = DecisionLog::read(dir.path().join("decisions.jsonl"))
        .await
        .unwrap();
    let report = OpportunityReport::compute(&bus.signals(), &decisions, &shadow.ledger().all());

    // Missed profit: blocking this signal cost the book the shadow P&L.
    assert_eq!(report.blocked_signals, 1);
    assert!(report.net_opportunity_cost > Decimal::ZERO);
    let guard = &report.by_component["VolatilityGuard"];
    assert_eq!(guard.blocked_count, 1);
    assert_eq!(guard.net_opportunity_cost, report.net_opportunity_cost);
}

#[tokio::test]
async fn stale_signal_expires_exactly_once() {
    let r = rig().await;

    let signal = make_signal("BTC-USD");
    let id = signal.id;
    r.machine.admit(signal, "generator").await.unwrap();

    let expired = r.machine.auto_expire(chrono::Duration::zero()).await.unwrap();
    assert_eq!(expired, vec![id]);
    assert_eq!(r.bus.current_state(id), Some(SignalState::Expired));

    let second = r.machine.auto_expire(chrono::Duration::zero()).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(r.bus.current_state(id), Some(SignalState::Expired));
}

#[tokio::test]
async fn restart_rebuilds_the_exact_pre_crash_index() {
    let r = rig().await;

    r.pipeline
        .process(make_signal("BTC-USD"), &market(0.01))
        .await
        .unwrap();
    r.pipeline
        .process(make_signal("BTC-USD"), &market(0.05))
        .await
        .unwrap();

    let mut before = r.bus.signals();
    before.sort_by_key(|rec| rec.signal.id);
    let last_seq = r.bus.last_seq();

    // "Crash": reopen the same log fresh.
    let reopened = EventBus::open(r.dir.path().join("events.jsonl")).await.unwrap();
    let mut after = reopened.signals();
    after.sort_by_key(|rec| rec.signal.id);

    assert_eq!(before, after);
    assert_eq!(reopened.last_seq(), last_seq);
}

#[tokio::test]
async fn decisions_record_the_market_that_caused_the_block() {
    let r = rig().await;

    let signal = make_signal("BTC-USD");
    let id = signal.id;
    r.pipeline.process(signal, &market(0.05)).await.unwrap();

    drop(r.pipeline);
    Arc::try_unwrap(r.tracker).ok().unwrap().shutdown().await;

    let decisions = DecisionLog::read(r.dir.path().join("decisions.jsonl"))
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].signal_id, id);
    assert_eq!(decisions[0].market_snapshot.volatility, 0.05);
}
