// End-to-end walkthrough: generator -> live pipeline -> shadow engine ->
// opportunity report, all against a temp directory.
//
// Run with: cargo run -p lifecycle --example full_pipeline

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::{ComponentScore, MarketSnapshot, Signal, SignalDirection, SignalRecord};
use conviction::{ConvictionScorer, WeightStore};
use event_log::EventBus;
use lifecycle::{
    DecisionLog, DecisionTracker, ExecutionBackend, FillResult, LivePipeline, SignalStateMachine,
    VolatilityGuard,
};
use rust_decimal::Decimal;
use shadow_execution::{OpportunityReport, ShadowEngine, StaticPrices, TimeAndTargetExit};
use tracing::{info, Level};
use uuid::Uuid;

struct PaperFill;

#[async_trait]
impl ExecutionBackend for PaperFill {
    async fn execute(&self, signal: &SignalRecord) -> Result<FillResult> {
        info!("filling {} at market", signal.signal.id);
        Ok(FillResult {
            fill_price: Decimal::new(10_000, 2),
            filled_at: Utc::now(),
        })
    }
}

fn make_signal(symbol: &str, momentum: f64) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        direction: SignalDirection::Long,
        strategy_name: "momentum-v1".to_string(),
        component_scores: BTreeMap::from([
            (
                "momentum".to_string(),
                ComponentScore {
                    confidence: momentum,
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let dir = tempfile::tempdir()?;
    let data = dir.path();

    tokio::fs::write(
        data.join("weights.toml"),
        "[weights]\nmomentum = 0.5\norderflow = 0.5\n",
    )
    .await?;

    let bus = Arc::new(EventBus::open(data.join("events.jsonl")).await?);
    let machine = Arc::new(SignalStateMachine::new(bus.clone()));
    let weights = Arc::new(WeightStore::open(data.join("weights.toml")).await?);
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
    prices.set("ETH-USD", Decimal::new(50, 0));

    let shadow = ShadowEngine::open(
        bus.clone(),
        data.join("shadow_outcomes.jsonl"),
        data.join("shadow_checkpoint.json"),
        prices.clone(),
        Box::new(TimeAndTargetExit::default()),
    )
    .await?;

    // Calm market: the BTC signal sails through.
    let calm = MarketSnapshot {
        price: Decimal::new(100, 0),
        volatility: 0.01,
        spread: Decimal::new(1, 2),
        captured_at: Utc::now(),
    };
    let outcome = pipeline.process(make_signal("BTC-USD", 0.8), &calm).await?;
    info!("live outcome: {:?}", outcome);

    // Volatile market: the ETH signal is vetoed.
    let volatile = MarketSnapshot {
        price: Decimal::new(50, 0),
        volatility: 0.05,
        spread: Decimal::new(2, 2),
        captured_at: Utc::now(),
    };
    let outcome = pipeline.process(make_signal("ETH-USD", 0.7), &volatile).await?;
    info!("live outcome: {:?}", outcome);

    // The shadow engine simulates both, blocked or not.
    shadow.poll_once().await?;
    prices.set("ETH-USD", Decimal::new(53, 0)); // +6%: the blocked trade would have won
    shadow.poll_once().await?;

    // Release the pipeline's tracker handle and drain the decision queue.
    drop(pipeline);
    if let Ok(tracker) = Arc::try_unwrap(tracker) {
        tracker.shutdown().await;
    }

    let decisions = DecisionLog::read(data.join("decisions.jsonl")).await?;
    let report = OpportunityReport::compute(&bus.signals(), &decisions, &shadow.ledger().all());

    info!("blocked signals: {}", report.blocked_signals);
    info!("net opportunity cost: {}", report.net_opportunity_cost);
    for (component, stats) in &report.by_component {
        info!(
            "  {}: {} blocked, missed {} / avoided {}",
            component, stats.blocked_count, stats.missed_profit, stats.avoided_loss
        );
    }

    Ok(())
}
